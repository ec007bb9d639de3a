//! Metric display formatting.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value::Value;

use super::metadata::ReportMetadata;
use super::table::{ReportTable, Row, LABEL};

/// How a metric is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricFormat {
    /// Rounded to the given number of decimals.
    Number(u32),
    /// Ratio shown as a percentage with the given number of decimals.
    Percent(u32),
    /// Seconds shown as `HH:MM:SS`.
    Duration,
    /// Currency symbol and two decimals.
    Money,
}

impl MetricFormat {
    /// Format a value. Non-numeric values are returned unchanged.
    pub fn format(&self, value: &Value, currency_symbol: &str) -> Value {
        let Some(number) = value.as_f64() else {
            return value.clone();
        };
        match self {
            MetricFormat::Number(precision) => {
                if matches!(value, Value::Int(_)) {
                    value.clone()
                } else {
                    Value::Float(number).round(*precision)
                }
            }
            MetricFormat::Percent(precision) => {
                let percent = Value::Float(number * 100.0).round(*precision);
                Value::Text(format!("{}%", percent))
            }
            MetricFormat::Duration => Value::Text(format_duration(number)),
            MetricFormat::Money => Value::Text(format!("{}{:.2}", currency_symbol, number)),
        }
    }

    pub fn is_percent(&self) -> bool {
        matches!(self, MetricFormat::Percent(_))
    }
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as i64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// The `format_metrics` request parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatMode {
    /// `0`: raw values.
    None,
    /// `bc`: only percentage derived metrics.
    #[default]
    BackCompat,
    /// `1`: derived metrics and declared metric formats.
    Typed,
    /// `all`: typed formats plus name-based formats of legacy metrics.
    All,
}

impl FromStr for FormatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "false" => Ok(FormatMode::None),
            "bc" => Ok(FormatMode::BackCompat),
            "1" | "true" => Ok(FormatMode::Typed),
            "all" => Ok(FormatMode::All),
            other => Err(format!("unknown format_metrics value '{}'", other)),
        }
    }
}

/// Format of metrics known only by name.
pub fn legacy_format_for(column: &str) -> Option<MetricFormat> {
    if column.starts_with("revenue") || column.ends_with("_revenue") {
        Some(MetricFormat::Money)
    } else if column.ends_with("_rate") {
        Some(MetricFormat::Percent(0))
    } else if column == "sum_visit_length" || column.starts_with("avg_time_") {
        Some(MetricFormat::Duration)
    } else {
        None
    }
}

/// Formats every metric of a report table according to a [`FormatMode`].
#[derive(Debug, Clone)]
pub struct MetricFormatter<'m> {
    mode: FormatMode,
    metadata: &'m ReportMetadata,
    currency_symbol: String,
}

impl<'m> MetricFormatter<'m> {
    pub fn new(mode: FormatMode, metadata: &'m ReportMetadata) -> Self {
        Self {
            mode,
            metadata,
            currency_symbol: "$".to_string(),
        }
    }

    pub fn with_currency_symbol(mut self, symbol: &str) -> Self {
        self.currency_symbol = symbol.to_string();
        self
    }

    /// Format applied to `column` under the current mode.
    pub fn format_for(&self, column: &str) -> Option<MetricFormat> {
        if column == LABEL {
            return None;
        }
        let derived = self
            .metadata
            .derived_metrics
            .iter()
            .find(|m| m.name() == column)
            .map(|m| m.format());

        match self.mode {
            FormatMode::None => None,
            FormatMode::BackCompat => derived.filter(MetricFormat::is_percent),
            FormatMode::Typed => derived.or_else(|| self.metadata.metric_formats.get(column).copied()),
            FormatMode::All => derived
                .or_else(|| self.metadata.metric_formats.get(column).copied())
                .or_else(|| legacy_format_for(column)),
        }
    }

    /// Format every row of `table`, its summary, totals, subtables and
    /// comparison tables.
    pub fn format_table(&self, table: &mut ReportTable) {
        if self.mode == FormatMode::None {
            return;
        }
        table.walk_rows_mut(&mut |row| self.format_row(row));
    }

    fn format_row(&self, row: &mut Row) {
        for (name, value) in row.columns.iter_mut() {
            if let Some(format) = self.format_for(name) {
                *value = format.format(value, &self.currency_symbol);
            }
        }
    }
}

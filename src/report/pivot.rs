//! Pivot a report by its subtable dimension.
//!
//! Every top-level row becomes one row whose columns are the labels of the
//! subtables, valued by one metric of the matching subtable row:
//!
//! ```text
//! label      nb_visits  subtable                 label      google  bing
//! search     30         google 20, bing 10   =>  search     20      10
//! website    5          google 5                 website    5       0
//! ```

use tracing::warn;

use crate::value::Value;

use super::metadata::ReportMetadata;
use super::table::{ReportTable, Row, LABEL};

/// Table metadata naming the dimension a table was pivoted by.
pub const PIVOTED_BY: &str = "pivoted_by";

/// Pivot transform for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    dimension: String,
    column: String,
    limit: Option<usize>,
}

impl Pivot {
    /// Pivot by `dimension`, valued by `column`. `limit` bounds the number of
    /// pivot columns.
    pub fn new(dimension: &str, column: &str, limit: Option<usize>) -> Self {
        Self {
            dimension: dimension.to_string(),
            column: column.to_string(),
            limit,
        }
    }

    /// Default value column of a report: its first metric, else visits.
    pub fn default_column(metadata: &ReportMetadata) -> String {
        metadata
            .metrics
            .first()
            .cloned()
            .unwrap_or_else(|| "nb_visits".to_string())
    }

    /// Pivot `table` in place. Returns false, leaving the table untouched,
    /// when the report cannot be pivoted by the requested dimension.
    pub fn apply(&self, table: &mut ReportTable, metadata: &ReportMetadata) -> bool {
        if metadata.subtable_dimension.as_deref() != Some(self.dimension.as_str()) {
            warn!(
                report = %metadata.id(),
                pivot_by = %self.dimension,
                "report cannot be pivoted by this dimension"
            );
            return false;
        }

        let columns = self.pivot_columns(table);
        for row in table.rows_with_summary_mut() {
            let mut pivoted = Row::new();
            pivoted.metadata = std::mem::take(&mut row.metadata);
            if let Some(label) = row.column(LABEL) {
                pivoted.set_column(LABEL, label.clone());
            }
            for name in &columns {
                let value = row
                    .subtable()
                    .and_then(|sub| sub.row_by_label(name))
                    .and_then(|r| r.column(&self.column))
                    .cloned()
                    .unwrap_or(Value::Int(0));
                pivoted.set_column(name.clone(), value);
            }
            *row = pivoted;
        }
        table.set_metadata(PIVOTED_BY, self.dimension.clone());
        true
    }

    /// Subtable labels ordered by their total of the pivot column, first
    /// seen first on ties, cut to the limit.
    fn pivot_columns(&self, table: &ReportTable) -> Vec<String> {
        let mut totals: Vec<(String, f64)> = Vec::new();
        for sub_row in table
            .rows_with_summary()
            .filter_map(Row::subtable)
            .flat_map(ReportTable::rows_with_summary)
        {
            let Some(label) = sub_row.label() else {
                continue;
            };
            let value = sub_row
                .column(&self.column)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            match totals.iter_mut().find(|(l, _)| *l == label) {
                Some((_, total)) => *total += value,
                None => totals.push((label, value)),
            }
        }
        totals.sort_by(|a, b| b.1.total_cmp(&a.1));
        if let Some(limit) = self.limit {
            totals.truncate(limit);
        }
        totals.into_iter().map(|(label, _)| label).collect()
    }
}

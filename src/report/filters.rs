//! Report table filters.
//!
//! Filters are plain data: an ordered list of [`Filter`] values is built
//! from the request and applied to a table, or queued on the table to run
//! at the end of post-processing.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::value::Value;

use super::label::safe_decode_label;
use super::metadata::ReportMetadata;
use super::params::{self, RequestParams};
use super::table::{ReportTable, Row, LABEL, OTHERS_LABEL};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// One table transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum Filter {
    /// Keep rows whose `column` matches `pattern` (case-insensitive).
    Pattern { column: String, pattern: String },
    /// Keep rows that match, or that have a matching row below them.
    PatternRecursive { column: String, pattern: String },
    /// Drop rows whose `column` is below `min_value`. A value between 0 and
    /// 1 is a share of the column total.
    ExcludeLowPopulation { column: String, min_value: f64 },
    /// Sort rows, subtables included.
    Sort { column: String, order: SortOrder },
    /// Keep `limit` rows and sum the rest into the summary row.
    Truncate { limit: usize },
    /// Keep `limit` rows starting at `offset`.
    Limit {
        offset: usize,
        limit: Option<usize>,
        keep_summary_row: bool,
    },
    /// Decode then escape every label.
    SafeDecodeLabel,
    /// Rename columns.
    ReplaceColumnNames { mapping: Vec<(String, String)> },
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Pattern { .. } => "Pattern",
            Filter::PatternRecursive { .. } => "PatternRecursive",
            Filter::ExcludeLowPopulation { .. } => "ExcludeLowPopulation",
            Filter::Sort { .. } => "Sort",
            Filter::Truncate { .. } => "Truncate",
            Filter::Limit { .. } => "Limit",
            Filter::SafeDecodeLabel => "SafeDecodeLabel",
            Filter::ReplaceColumnNames { .. } => "ReplaceColumnNames",
        }
    }

    /// Column the filter reads, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Filter::Pattern { column, .. }
            | Filter::PatternRecursive { column, .. }
            | Filter::ExcludeLowPopulation { column, .. }
            | Filter::Sort { column, .. } => Some(column.as_str()),
            _ => None,
        }
    }

    pub fn apply(&self, table: &mut ReportTable) {
        match self {
            Filter::Pattern { column, pattern } => {
                let re = pattern_regex(pattern);
                table.rows.retain(|row| row_matches(row, column, re.as_ref()));
            }
            Filter::PatternRecursive { column, pattern } => {
                let re = pattern_regex(pattern);
                retain_recursive(table, column, re.as_ref());
            }
            Filter::ExcludeLowPopulation { column, min_value } => {
                let threshold = if *min_value > 0.0 && *min_value < 1.0 {
                    table.column_total(column) * min_value
                } else {
                    *min_value
                };
                table.rows.retain(|row| {
                    row.column(column)
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0)
                        >= threshold
                });
            }
            Filter::Sort { column, order } => sort_recursive(table, column, *order),
            Filter::Truncate { limit } => truncate(table, *limit),
            Filter::Limit {
                offset,
                limit,
                keep_summary_row,
            } => {
                let start = (*offset).min(table.rows.len());
                let end = match limit {
                    Some(limit) => start.saturating_add(*limit).min(table.rows.len()),
                    None => table.rows.len(),
                };
                table.rows = table.rows.drain(start..end).collect();
                if !keep_summary_row {
                    table.summary_row = None;
                }
            }
            Filter::SafeDecodeLabel => table.walk_rows_mut(&mut |row| {
                if let Some(Value::Text(label)) = row.column(LABEL) {
                    let decoded = safe_decode_label(label);
                    row.set_column(LABEL, decoded);
                }
            }),
            Filter::ReplaceColumnNames { mapping } => table.walk_rows_mut(&mut |row| {
                for (name, _) in row.columns.iter_mut() {
                    if let Some((_, to)) = mapping
                        .iter()
                        .find(|(from, _)| from.as_str() == name.as_str())
                    {
                        *name = to.clone();
                    }
                }
            }),
        }
    }
}

/// Apply `filters` in order.
pub fn apply_filters(table: &mut ReportTable, filters: &[Filter]) {
    for filter in filters {
        filter.apply(table);
    }
}

/// Run and clear the filters queued on `table`.
pub fn apply_queued_filters(table: &mut ReportTable) {
    let queued = std::mem::take(&mut table.queued_filters);
    apply_filters(table, &queued);
}

/// The generic filter chain of a request, in application order: Pattern,
/// PatternRecursive, ExcludeLowPopulation, Sort, Truncate, Limit.
pub fn generic_filters(request: &RequestParams, metadata: &ReportMetadata) -> Vec<Filter> {
    let mut filters = Vec::new();

    if let Some(pattern) = request.get_non_empty(params::FILTER_PATTERN) {
        filters.push(Filter::Pattern {
            column: request
                .get_non_empty(params::FILTER_COLUMN)
                .unwrap_or(LABEL)
                .to_string(),
            pattern: pattern.to_string(),
        });
    }

    if let Some(pattern) = request.get_non_empty(params::FILTER_PATTERN_RECURSIVE) {
        filters.push(Filter::PatternRecursive {
            column: request
                .get_non_empty(params::FILTER_COLUMN_RECURSIVE)
                .unwrap_or(LABEL)
                .to_string(),
            pattern: pattern.to_string(),
        });
    }

    if let (Some(column), Some(min_value)) = (
        request.get_non_empty(params::FILTER_EXCLUDELOWPOP),
        request.get_f64(params::FILTER_EXCLUDELOWPOP_VALUE),
    ) {
        filters.push(Filter::ExcludeLowPopulation {
            column: column.to_string(),
            min_value,
        });
    }

    let sort_column = request
        .get_non_empty(params::FILTER_SORT_COLUMN)
        .map(str::to_string)
        .or_else(|| metadata.default_sort_column.clone());
    if let Some(column) = sort_column {
        let order = request
            .get(params::FILTER_SORT_ORDER)
            .and_then(SortOrder::parse)
            .unwrap_or(metadata.default_sort_order);
        filters.push(Filter::Sort { column, order });
    }

    if let Some(limit) = request.get_i64(params::FILTER_TRUNCATE) {
        if limit >= 0 {
            filters.push(Filter::Truncate {
                limit: limit as usize,
            });
        }
    }

    let limit = match request.get_i64(params::FILTER_LIMIT) {
        Some(n) if n < 0 => None,
        Some(n) => Some(n as usize),
        None => metadata.default_limit,
    };
    let offset = request
        .get_i64(params::FILTER_OFFSET)
        .filter(|o| *o > 0)
        .map_or(0, |o| o as usize);
    if limit.is_some() || offset > 0 {
        filters.push(Filter::Limit {
            offset,
            limit,
            keep_summary_row: request.get_bool(params::KEEP_SUMMARY_ROW, false),
        });
    }

    filters
}

fn pattern_regex(pattern: &str) -> Option<Regex> {
    let build = |p: &str| RegexBuilder::new(p).case_insensitive(true).build();
    match build(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "invalid filter pattern, matching literally");
            build(&regex::escape(pattern)).ok()
        }
    }
}

fn row_matches(row: &Row, column: &str, re: Option<&Regex>) -> bool {
    match (row.column(column), re) {
        (Some(value), Some(re)) => re.is_match(&value.to_string()),
        _ => false,
    }
}

/// Whether any row of `table` (or below) matches; non-matching branches
/// are pruned.
fn retain_recursive(table: &mut ReportTable, column: &str, re: Option<&Regex>) -> bool {
    table.rows.retain_mut(|row| {
        let subtable_matches = match row.subtable.as_deref_mut() {
            Some(sub) => retain_recursive(sub, column, re),
            None => false,
        };
        row_matches(row, column, re) || subtable_matches
    });
    !table.rows.is_empty()
}

fn sort_recursive(table: &mut ReportTable, column: &str, order: SortOrder) {
    let mut stack: Vec<&mut ReportTable> = vec![table];
    while let Some(table) = stack.pop() {
        let mode = SortMode::for_column(table, column);
        table
            .rows
            .sort_by(|a, b| compare_rows(a, b, column, order, mode));
        for row in table.rows_with_summary_mut() {
            if let Some(sub) = row.subtable.as_deref_mut() {
                stack.push(sub);
            }
        }
    }
}

/// How one table compares a sort column, fixed by its first non-null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortMode {
    Numeric,
    Text,
}

impl SortMode {
    fn for_column(table: &ReportTable, column: &str) -> Self {
        match table
            .rows
            .iter()
            .filter_map(|r| r.column(column))
            .find(|v| !v.is_null())
        {
            Some(v) if v.as_f64().is_none() => SortMode::Text,
            _ => SortMode::Numeric,
        }
    }
}

fn compare_rows(a: &Row, b: &Row, column: &str, order: SortOrder, mode: SortMode) -> Ordering {
    let va = a.column(column).filter(|v| !v.is_null());
    let vb = b.column(column).filter(|v| !v.is_null());
    // rows without a value always go last
    let (va, vb) = match (va, vb) {
        (None, None) => return Ordering::Equal,
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (Some(va), Some(vb)) => (va, vb),
    };
    let ordering = match mode {
        SortMode::Numeric => match (va.as_f64(), vb.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            // non-numbers follow the numbers in either order
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => text_key(va).cmp(&text_key(vb)),
        },
        SortMode::Text => text_key(va).cmp(&text_key(vb)),
    };
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn text_key(value: &Value) -> String {
    value.to_string().to_lowercase()
}

fn truncate(table: &mut ReportTable, limit: usize) {
    if table.rows.len() <= limit {
        return;
    }
    let rest: Vec<Row> = table.rows.split_off(limit);
    let mut summary = table.summary_row.take().unwrap_or_else(|| {
        let mut row = Row::new();
        row.set_column(LABEL, OTHERS_LABEL);
        row
    });
    for row in &rest {
        summary.sum_row(row);
    }
    summary.subtable = None;
    table.summary_row = Some(summary);
}

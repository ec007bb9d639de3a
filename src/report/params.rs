//! Post-processing request parameters.
//!
//! Parameters arrive as a query string. Keys may repeat (`label=a&label=b`)
//! so every key maps to a list of values.

use std::collections::BTreeMap;

use url::form_urlencoded;

pub const PIVOT_BY: &str = "pivotBy";
pub const PIVOT_BY_COLUMN: &str = "pivotByColumn";
pub const PIVOT_BY_COLUMN_LIMIT: &str = "pivotByColumnLimit";
pub const TOTALS: &str = "totals";
pub const FLAT: &str = "flat";
pub const INCLUDE_AGGREGATE_ROWS: &str = "include_aggregate_rows";
pub const DISABLE_GENERIC_FILTERS: &str = "disable_generic_filters";
pub const FILTER_COLUMN: &str = "filter_column";
pub const FILTER_PATTERN: &str = "filter_pattern";
pub const FILTER_COLUMN_RECURSIVE: &str = "filter_column_recursive";
pub const FILTER_PATTERN_RECURSIVE: &str = "filter_pattern_recursive";
pub const FILTER_EXCLUDELOWPOP: &str = "filter_excludelowpop";
pub const FILTER_EXCLUDELOWPOP_VALUE: &str = "filter_excludelowpop_value";
pub const FILTER_SORT_COLUMN: &str = "filter_sort_column";
pub const FILTER_SORT_ORDER: &str = "filter_sort_order";
pub const FILTER_TRUNCATE: &str = "filter_truncate";
pub const FILTER_OFFSET: &str = "filter_offset";
pub const FILTER_LIMIT: &str = "filter_limit";
pub const KEEP_SUMMARY_ROW: &str = "keep_summary_row";
pub const COMPARE: &str = "compare";
pub const COMPARE_SEGMENTS: &str = "compareSegments";
pub const COMPARE_PERIODS: &str = "comparePeriods";
pub const COMPARE_DATES: &str = "compareDates";
pub const SEGMENT: &str = "segment";
pub const PERIOD: &str = "period";
pub const DATE: &str = "date";
pub const DISABLE_QUEUED_FILTERS: &str = "disable_queued_filters";
pub const HIDE_COLUMNS: &str = "hideColumns";
pub const SHOW_COLUMNS: &str = "showColumns";
pub const SHOW_RAW_METRICS: &str = "showRawMetrics";
pub const LABEL: &str = "label";
pub const EXPANDED: &str = "expanded";
pub const FORMAT_METRICS: &str = "format_metrics";

/// Multi-valued request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    values: BTreeMap<String, Vec<String>>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string; a leading `?` is ignored. `name[]` keys are
    /// folded into `name`.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = Self::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let key = key.strip_suffix("[]").unwrap_or(&*key).to_string();
            params.values.entry(key).or_default().push(value.into_owned());
        }
        params
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Replace every value of `key`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), vec![value.into()]);
    }

    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .entry(key.to_string())
            .or_default()
            .push(value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// First value of `key`, `None` when missing or blank.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `1` and `true` are true, anything else is false; missing keys give `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.trim(), "1" | "true"),
            None => default,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Values of `key`, splitting each on commas and dropping blanks.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_all(key)
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Requested labels, repeated or comma-separated.
    pub fn labels(&self) -> Vec<String> {
        self.get_list(LABEL)
    }

    /// Drop parameters that conflict: a label request never expands
    /// subtables.
    pub fn sanitize(&mut self) {
        if !self.labels().is_empty() && self.values.remove(EXPANDED).is_some() {
            tracing::debug!("ignoring expanded for a label request");
        }
    }
}

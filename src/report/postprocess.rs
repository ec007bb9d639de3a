//! The report post-processing pipeline.
//!
//! Stages run in a fixed order, each deciding from the request whether to
//! act:
//!
//! ```text
//! pivot -> totals -> flatten -> [before hook] -> generic filters
//!   -> derived metrics -> comparison -> [after hook] -> safe labels
//!   -> segment values -> queued filters -> column trimming
//!   -> label filter -> expanded -> metric formatting
//! ```
//!
//! Stages never fail. A stage that cannot do its work logs a warning and
//! leaves the table as it was.

use tracing::{debug, warn};
use url::form_urlencoded;

use crate::config::PostProcessingSettings;
use crate::value::Value;

use super::comparison::{compare, ComparisonRequest, ComparisonSource};
use super::derived::{compute_derived_columns, compute_derived_metrics};
use super::filters::{apply_filters, apply_queued_filters, generic_filters, Filter};
use super::flatten::flatten;
use super::format::{FormatMode, MetricFormatter};
use super::label::LabelFilter;
use super::metadata::ReportMetadata;
use super::params::{self, RequestParams};
use super::pivot::Pivot;
use super::table::{ReportTable, Row, LABEL};
use super::totals::compute_totals;

/// Row metadata or column holding the raw value of the report dimension.
pub const SEGMENT_VALUE: &str = "segmentValue";
/// Row metadata with the segment selecting the row's visits.
pub const SEGMENT_METADATA: &str = "segment";

/// Caller code run around the generic filters.
pub trait PostProcessHooks {
    /// After flattening, before the generic filters.
    fn before_generic_filters(&self, _table: &mut ReportTable, _request: &RequestParams) {}

    /// After derived metrics and comparisons.
    fn after_metrics(&self, _table: &mut ReportTable, _request: &RequestParams) {}
}

/// Request-scoped post-processor of one report.
pub struct PostProcessor<'a> {
    metadata: &'a ReportMetadata,
    request: RequestParams,
    hooks: Option<&'a dyn PostProcessHooks>,
    comparison_source: Option<&'a dyn ComparisonSource>,
    default_format: FormatMode,
    pivot_column_limit: Option<usize>,
    currency_symbol: String,
}

impl<'a> PostProcessor<'a> {
    /// Post-processor for `metadata`; the request is sanitized first.
    pub fn new(metadata: &'a ReportMetadata, mut request: RequestParams) -> Self {
        request.sanitize();
        let defaults = PostProcessingSettings::default();
        Self {
            metadata,
            request,
            hooks: None,
            comparison_source: None,
            default_format: FormatMode::default(),
            pivot_column_limit: limit_from(defaults.pivot_column_limit as i64),
            currency_symbol: "$".to_string(),
        }
    }

    pub fn with_hooks(mut self, hooks: &'a dyn PostProcessHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_comparison_source(mut self, source: &'a dyn ComparisonSource) -> Self {
        self.comparison_source = Some(source);
        self
    }

    pub fn with_settings(mut self, settings: &PostProcessingSettings) -> Self {
        self.default_format = settings.format_metrics.parse().unwrap_or_else(|e| {
            warn!(error = %e, "invalid format_metrics setting, using bc");
            FormatMode::BackCompat
        });
        self.pivot_column_limit = limit_from(settings.pivot_column_limit as i64);
        self
    }

    pub fn with_currency_symbol(mut self, symbol: &str) -> Self {
        self.currency_symbol = symbol.to_string();
        self
    }

    /// The sanitized request.
    pub fn request(&self) -> &RequestParams {
        &self.request
    }

    /// Run every stage on `table`.
    pub fn process(&self, mut table: ReportTable) -> ReportTable {
        self.apply_pivot(&mut table);
        self.apply_totals(&mut table);
        self.apply_flatten(&mut table);
        if let Some(hooks) = self.hooks {
            hooks.before_generic_filters(&mut table, &self.request);
        }
        self.apply_generic_filters(&mut table);
        compute_derived_metrics(&mut table, &self.metadata.derived_metrics);
        self.apply_comparison(&mut table);
        if let Some(hooks) = self.hooks {
            hooks.after_metrics(&mut table, &self.request);
        }
        table.queue_filter(Filter::SafeDecodeLabel);
        self.convert_segment_values(&mut table);
        if self.request.get_bool(params::DISABLE_QUEUED_FILTERS, false) {
            debug!(queued = table.queued_filters.len(), "queued filters disabled");
            table.queued_filters.clear();
        } else {
            apply_queued_filters(&mut table);
        }
        self.trim_columns(&mut table);
        self.apply_label_filter(&mut table);
        if !self.request.get_bool(params::EXPANDED, false) {
            table.remove_subtables();
        }
        self.format_metrics(&mut table);
        table
    }

    fn apply_pivot(&self, table: &mut ReportTable) {
        let Some(dimension) = self.request.get_non_empty(params::PIVOT_BY) else {
            return;
        };
        compute_derived_metrics(table, &self.metadata.derived_metrics);
        let column = self
            .request
            .get_non_empty(params::PIVOT_BY_COLUMN)
            .map(str::to_string)
            .unwrap_or_else(|| Pivot::default_column(self.metadata));
        let limit = match self.request.get_i64(params::PIVOT_BY_COLUMN_LIMIT) {
            Some(n) => limit_from(n),
            None => self.pivot_column_limit,
        };
        Pivot::new(dimension, &column, limit).apply(table, self.metadata);
    }

    fn apply_totals(&self, table: &mut ReportTable) {
        if !self.request.get_bool(params::TOTALS, true) {
            return;
        }
        let derived: Vec<String> = self
            .metadata
            .derived_metrics
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        compute_totals(table, &derived);
    }

    fn apply_flatten(&self, table: &mut ReportTable) {
        if !self.request.get_bool(params::FLAT, false) {
            return;
        }
        if self.metadata.supports_flatten {
            flatten(
                table,
                &self.metadata.flatten_separator,
                self.request.get_bool(params::INCLUDE_AGGREGATE_ROWS, false),
            );
        } else {
            debug!(report = %self.metadata.id(), "report cannot be flattened, dropping subtables");
            table.remove_subtables();
        }
    }

    fn apply_generic_filters(&self, table: &mut ReportTable) {
        if self.request.get_bool(params::DISABLE_GENERIC_FILTERS, false) {
            return;
        }
        let mut filters = generic_filters(&self.request, self.metadata);
        if !self.request.labels().is_empty() {
            filters.retain(|f| !matches!(f, Filter::Limit { .. } | Filter::Truncate { .. }));
        }
        if filters.is_empty() {
            return;
        }

        let needed: Vec<&str> = filters
            .iter()
            .filter_map(Filter::column)
            .filter(|c| self.metadata.derived_metric(c).is_some())
            .collect();
        if !needed.is_empty() {
            compute_derived_columns(table, &self.metadata.derived_metrics, &needed);
        }
        debug!(
            filters = ?filters.iter().map(Filter::name).collect::<Vec<_>>(),
            "applying generic filters"
        );
        apply_filters(table, &filters);
    }

    fn apply_comparison(&self, table: &mut ReportTable) {
        let series = ComparisonRequest::from_params(&self.request);
        if series.is_empty() {
            return;
        }
        match self.comparison_source {
            Some(source) => compare(
                table,
                &series,
                source,
                &self.request,
                &self.metadata.derived_metrics,
            ),
            None => warn!(
                report = %self.metadata.id(),
                "comparison requested without a comparison source"
            ),
        }
    }

    /// Turn `segmentValue` into a `segment` definition selecting the row.
    fn convert_segment_values(&self, table: &mut ReportTable) {
        let segment = self.metadata.segment.as_deref();
        table.walk_rows_mut(&mut |row| {
            let value = row
                .metadata
                .remove(SEGMENT_VALUE)
                .or_else(|| row.remove_column(SEGMENT_VALUE));
            row.remove_column(SEGMENT_VALUE);
            let (Some(segment), Some(value)) = (segment, value) else {
                return;
            };
            if value.is_null() {
                return;
            }
            let encoded: String =
                form_urlencoded::byte_serialize(value.to_string().as_bytes()).collect();
            row.set_metadata(SEGMENT_METADATA, format!("{}=={}", segment, encoded));
        });
    }

    fn trim_columns(&self, table: &mut ReportTable) {
        let hide = self.request.get_list(params::HIDE_COLUMNS);
        let show = self.request.get_list(params::SHOW_COLUMNS);
        if !hide.is_empty() || !show.is_empty() {
            table.walk_rows_mut(&mut |row| {
                row.columns.retain(|(name, _)| {
                    name == LABEL
                        || (!hide.contains(name) && (show.is_empty() || show.contains(name)))
                });
            });
        } else if !self.request.get_bool(params::SHOW_RAW_METRICS, false) {
            let temporary = self.metadata.temporary_columns();
            if !temporary.is_empty() {
                table.walk_rows_mut(&mut |row| {
                    row.columns.retain(|(name, _)| !temporary.contains(name));
                });
            }
        }
    }

    fn apply_label_filter(&self, table: &mut ReportTable) {
        let labels = self.request.labels();
        if labels.is_empty() {
            return;
        }
        LabelFilter::new(labels)
            .with_separator(&self.metadata.recursive_label_separator)
            .apply(table);
    }

    fn format_metrics(&self, table: &mut ReportTable) {
        let mode = match self.request.get_non_empty(params::FORMAT_METRICS) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(error = %e, "invalid format_metrics parameter");
                self.default_format
            }),
            None => self.default_format,
        };
        MetricFormatter::new(mode, self.metadata)
            .with_currency_symbol(&self.currency_symbol)
            .format_table(table);
    }
}

/// A non-positive limit means unlimited.
fn limit_from(n: i64) -> Option<usize> {
    (n > 0).then_some(n as usize)
}

/// Value of `column` on the row labelled `label`.
pub fn row_value<'t>(table: &'t ReportTable, label: &str, column: &str) -> Option<&'t Value> {
    table.row_by_label(label).and_then(|r: &Row| r.column(column))
}

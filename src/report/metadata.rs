//! Report metadata and the provider seam.
//!
//! Everything the post-processor needs to know about a report but cannot
//! read from the table itself: which derived metrics it exposes, whether it
//! can be flattened, its label separators and default sorting.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::derived::{core_derived_metrics, DerivedMetric};
use super::filters::SortOrder;
use super::format::MetricFormat;

/// Default separator between the labels of a flattened path.
pub const DEFAULT_FLATTEN_SEPARATOR: &str = " - ";

/// Declared shape of one report.
#[derive(Clone)]
pub struct ReportMetadata {
    pub module: String,
    pub action: String,
    /// Dimension of the top-level rows.
    pub dimension: Option<String>,
    /// Dimension of the subtable rows; pivoting is only possible by it.
    pub subtable_dimension: Option<String>,
    /// Base metrics, in display order.
    pub metrics: Vec<String>,
    /// Display formats of base metrics.
    pub metric_formats: BTreeMap<String, MetricFormat>,
    /// Derived metrics in computation order.
    pub derived_metrics: Vec<Arc<dyn DerivedMetric>>,
    pub supports_flatten: bool,
    pub flatten_separator: String,
    pub recursive_label_separator: String,
    /// Segment dimension rows of the report can be turned into.
    pub segment: Option<String>,
    pub default_sort_column: Option<String>,
    pub default_sort_order: SortOrder,
    pub default_limit: Option<usize>,
}

impl fmt::Debug for ReportMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportMetadata")
            .field("module", &self.module)
            .field("action", &self.action)
            .field("dimension", &self.dimension)
            .field("metrics", &self.metrics)
            .field(
                "derived_metrics",
                &self.derived_metrics.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("supports_flatten", &self.supports_flatten)
            .finish_non_exhaustive()
    }
}

impl ReportMetadata {
    pub fn new(module: &str, action: &str) -> Self {
        Self {
            module: module.to_string(),
            action: action.to_string(),
            dimension: None,
            subtable_dimension: None,
            metrics: Vec::new(),
            metric_formats: BTreeMap::new(),
            derived_metrics: Vec::new(),
            supports_flatten: true,
            flatten_separator: DEFAULT_FLATTEN_SEPARATOR.to_string(),
            recursive_label_separator: ">".to_string(),
            segment: None,
            default_sort_column: None,
            default_sort_order: SortOrder::Desc,
            default_limit: None,
        }
    }

    /// `Module.action`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.module, self.action)
    }

    pub fn with_dimension(mut self, dimension: &str) -> Self {
        self.dimension = Some(dimension.to_string());
        self
    }

    pub fn with_subtable_dimension(mut self, dimension: &str) -> Self {
        self.subtable_dimension = Some(dimension.to_string());
        self
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metric_format(mut self, column: &str, format: MetricFormat) -> Self {
        self.metric_formats.insert(column.to_string(), format);
        self
    }

    pub fn with_derived_metric(mut self, metric: Arc<dyn DerivedMetric>) -> Self {
        self.derived_metrics.push(metric);
        self
    }

    /// Add the visit-based derived metrics not declared yet.
    pub fn with_core_derived_metrics(mut self) -> Self {
        for metric in core_derived_metrics() {
            if self.derived_metric(metric.name()).is_none() {
                self.derived_metrics.push(metric);
            }
        }
        self
    }

    pub fn with_flatten_supported(mut self, supported: bool) -> Self {
        self.supports_flatten = supported;
        self
    }

    pub fn with_flatten_separator(mut self, separator: &str) -> Self {
        self.flatten_separator = separator.to_string();
        self
    }

    pub fn with_segment(mut self, segment: &str) -> Self {
        self.segment = Some(segment.to_string());
        self
    }

    pub fn with_default_sort(mut self, column: &str, order: SortOrder) -> Self {
        self.default_sort_column = Some(column.to_string());
        self.default_sort_order = order;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn derived_metric(&self, name: &str) -> Option<&Arc<dyn DerivedMetric>> {
        self.derived_metrics.iter().find(|m| m.name() == name)
    }

    /// Helper columns of every derived metric, without duplicates.
    pub fn temporary_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for column in self.derived_metrics.iter().flat_map(|m| m.temporary_columns()) {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }
}

/// Source of report metadata, keyed by module and action.
pub trait ReportMetadataProvider {
    fn report(&self, module: &str, action: &str) -> Option<ReportMetadata>;
}

/// In-memory [`ReportMetadataProvider`].
#[derive(Debug, Clone, Default)]
pub struct ReportRegistry {
    reports: HashMap<(String, String), ReportMetadata>,
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reports every installation has.
    pub fn with_core_reports() -> Self {
        let visit_metrics = ["nb_visits", "nb_actions", "sum_visit_length", "bounce_count"];
        let mut registry = Self::new();
        registry.register(
            ReportMetadata::new("VisitsSummary", "get")
                .with_metrics(visit_metrics.iter().copied().chain(["nb_visits_converted"]))
                .with_metric_format("sum_visit_length", MetricFormat::Duration)
                .with_core_derived_metrics()
                .with_flatten_supported(false),
        );
        registry.register(
            ReportMetadata::new("Referrers", "getReferrerType")
                .with_dimension("referrerType")
                .with_subtable_dimension("referrerName")
                .with_segment("referrerType")
                .with_metrics(visit_metrics)
                .with_core_derived_metrics()
                .with_default_sort("nb_visits", SortOrder::Desc),
        );
        registry.register(
            ReportMetadata::new("Actions", "getPageUrls")
                .with_dimension("pageUrl")
                .with_metrics(["nb_hits", "nb_visits", "sum_time_spent"])
                .with_metric_format("sum_time_spent", MetricFormat::Duration)
                .with_flatten_separator("/")
                .with_default_sort("nb_hits", SortOrder::Desc),
        );
        registry.register(
            ReportMetadata::new("UserCountry", "getCountry")
                .with_dimension("countryCode")
                .with_segment("countryCode")
                .with_metrics(visit_metrics)
                .with_core_derived_metrics()
                .with_flatten_supported(false)
                .with_default_sort("nb_visits", SortOrder::Desc),
        );
        registry
    }

    /// Add or replace a report.
    pub fn register(&mut self, metadata: ReportMetadata) {
        self.reports.insert(
            (metadata.module.clone(), metadata.action.clone()),
            metadata,
        );
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl ReportMetadataProvider for ReportRegistry {
    fn report(&self, module: &str, action: &str) -> Option<ReportMetadata> {
        self.reports
            .get(&(module.to_string(), action.to_string()))
            .cloned()
    }
}

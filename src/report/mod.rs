//! Report post-processing.
//!
//! A [`ReportTable`] read from an archive goes through a [`PostProcessor`]
//! before it reaches the caller. The processor is driven by the request's
//! [`RequestParams`] and by the report's [`ReportMetadata`].
//!
//! ```text
//! archive blob -> ReportTable -> PostProcessor::process -> ReportTable
//!                                   |  pivot, totals, flatten
//!                                   |  generic filters, derived metrics
//!                                   |  comparison, queued filters
//!                                   |  column trimming, label filter
//!                                   |  metric formatting
//! ```

mod comparison;
mod derived;
mod filters;
mod flatten;
mod format;
mod label;
mod metadata;
pub mod params;
mod pivot;
mod postprocess;
mod table;
mod totals;

pub use comparison::{
    compare, ComparisonRequest, ComparisonSource, COMPARE_DATE, COMPARE_PERIOD, COMPARE_SEGMENT,
};
pub use derived::{
    compute_derived_columns, compute_derived_metrics, core_derived_metrics, is_computed,
    DerivedMetric, MetricContext, Ratio, ShareOfParent, PROCESSED_METRICS_COMPUTED,
};
pub use filters::{apply_filters, apply_queued_filters, generic_filters, Filter, SortOrder};
pub use flatten::{flatten, IS_AGGREGATE};
pub use format::{format_duration, legacy_format_for, FormatMode, MetricFormat, MetricFormatter};
pub use label::{safe_decode_label, LabelFilter, LABEL_INDEX, LABEL_PATH_SEPARATOR};
pub use metadata::{ReportMetadata, ReportMetadataProvider, ReportRegistry};
pub use params::RequestParams;
pub use pivot::{Pivot, PIVOTED_BY};
pub use postprocess::{
    row_value, PostProcessHooks, PostProcessor, SEGMENT_METADATA, SEGMENT_VALUE,
};
pub use table::{ReportTable, Row, LABEL, OTHERS_LABEL};
pub use totals::{compute_totals, TOTALS_LABEL};

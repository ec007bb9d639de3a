//! # Tally
//!
//! Archiving and query-aggregation core of a multi-tenant web analytics
//! platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Raw logs (log_visit, ...)                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [aggregate + segment]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Aggregate rows per dimension and metric           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [archive::ArchiveWriter]
//! ┌─────────────────────────────────────────────────────────┐
//! │      archive_numeric_YYYY_MM / archive_blob_YYYY_MM      │
//! │      (records, chunked subtables, completion flags)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [archive::ArchiveSelector]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ReportTable                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [report::PostProcessor]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Filtered, flattened, compared and formatted report   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod archive;
pub mod cache;
pub mod config;
pub mod period;
pub mod report;
pub mod segment;
pub mod sql;
pub mod value;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::aggregate::{DimensionQuery, LogAggregator, QueryError, QueryResult};
    pub use crate::archive::{
        ArchiveIdAndVisits, ArchiveParams, ArchiveSelector, ArchiveStatus, ArchiveStore,
        ArchiveWriter, BlobRecord, RecordKind, StorageError, StorageResult, SubtableSelection,
    };
    pub use crate::cache::ArchiveIdCache;
    pub use crate::config::Settings;
    pub use crate::period::{Period, PeriodKind};
    pub use crate::report::{
        PostProcessor, ReportMetadata, ReportRegistry, ReportTable, RequestParams, Row,
    };
    pub use crate::segment::{SegmentEvaluator, SqlSegment};
    pub use crate::value::Value;
}

pub use period::Period;
pub use value::Value;

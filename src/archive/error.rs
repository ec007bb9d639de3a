//! Archive storage errors.

use thiserror::Error;

/// Result type for archive storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the archive writer and selector.
///
/// A missing archive is not an error: selectors return `None` for it.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record name is empty, too long or collides with the chunk naming scheme.
    #[error("invalid record name '{name}': {reason}")]
    InvalidRecordName { name: String, reason: String },

    /// Writer method called out of order.
    #[error("cannot {operation} while the archive is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// No archive id could be allocated. The writer cannot continue.
    #[error("failed to allocate an archive id in {table}: {reason}")]
    ArchiveIdAllocation { table: String, reason: String },

    /// A subtable request that names both a record list and "all" ids.
    #[error("ambiguous record request: {0}")]
    AmbiguousRecordRequest(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to (de)serialize report table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to (de)serialize chunk: {0}")]
    Chunk(#[from] bincode::Error),

    #[error("blob (de)compression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Settings(#[from] crate::config::SettingsError),
}

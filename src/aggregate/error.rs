//! Query construction errors.

use thiserror::Error;

use crate::segment::SegmentError;

/// Result type for aggregation queries.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while building or running an aggregation query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A dimension is neither an identifier nor a parseable expression.
    #[error("invalid dimension '{dimension}': {reason}")]
    InvalidDimension { dimension: String, reason: String },

    /// A requested metric is not part of the source's vocabulary.
    #[error("unknown metric '{metric}' for {source_name}")]
    UnknownMetric { metric: String, source_name: String },

    /// A column, alias or table name is not a valid identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// An extra select or filter fragment does not parse.
    #[error("invalid SQL fragment: {0}")]
    InvalidFragment(String),

    /// No site ids were given.
    #[error("an aggregation query needs at least one site id")]
    NoSites,

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Bind parameters could not be hashed into a temporary table name.
    #[error("failed to hash segment parameters: {0}")]
    Hash(#[from] serde_json::Error),
}

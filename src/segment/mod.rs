//! Segment evaluation seam.
//!
//! A segment is a boolean predicate over log attributes. Parsing segment
//! definitions is outside this crate: the aggregation layer only consumes
//! the compiled SQL predicate through [`SegmentEvaluator`].
//!
//! [`SqlSegment`] is the evaluator tally ships with. It wraps a predicate
//! that was already compiled to SQL (for example by the tracking frontend),
//! validates it, and reports which log tables it reads.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::sql::validate_expression;
use crate::value::Value;

static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.[A-Za-z_]").unwrap());

/// Errors raised while compiling a segment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    #[error("invalid segment predicate '{definition}': {reason}")]
    Invalid { definition: String, reason: String },

    #[error("segment predicate expects {expected} bind parameters, got {actual}")]
    BindMismatch { expected: usize, actual: usize },
}

/// A segment predicate compiled for a set of sites.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledSegment {
    /// Boolean SQL fragment, using `?` placeholders.
    pub sql: String,
    pub bind: Vec<Value>,
    /// Tables the predicate references, by the name used in `sql`.
    pub tables: BTreeSet<String>,
}

impl CompiledSegment {
    /// True when every referenced table is in `allowed`.
    pub fn only_uses(&self, allowed: &[&str]) -> bool {
        self.tables.iter().all(|t| allowed.contains(&t.as_str()))
    }
}

/// Compiles a segment definition into a SQL predicate.
pub trait SegmentEvaluator {
    /// The segment definition as given by the caller. Hashed into archive
    /// flag names and temporary table names.
    fn definition(&self) -> &str;

    /// Whether the segment selects everything.
    fn is_empty(&self) -> bool;

    fn compile(&self, site_ids: &[i64]) -> Result<CompiledSegment, SegmentError>;
}

/// A segment whose SQL predicate is known up front.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlSegment {
    definition: String,
    sql: String,
    bind: Vec<Value>,
}

impl SqlSegment {
    /// The segment matching all visits.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap a compiled predicate. `definition` is the user-facing segment
    /// string (e.g. `browserCode==FF`), `sql` the predicate it compiles to.
    pub fn new(
        definition: impl Into<String>,
        sql: impl Into<String>,
        bind: Vec<Value>,
    ) -> Result<Self, SegmentError> {
        let definition = definition.into();
        let sql = sql.into();

        if !sql.trim().is_empty() {
            validate_expression(&sql).map_err(|reason| SegmentError::Invalid {
                definition: definition.clone(),
                reason,
            })?;
        }

        let expected = sql.matches('?').count();
        if expected != bind.len() {
            return Err(SegmentError::BindMismatch {
                expected,
                actual: bind.len(),
            });
        }

        Ok(Self {
            definition,
            sql,
            bind,
        })
    }
}

impl SegmentEvaluator for SqlSegment {
    fn definition(&self) -> &str {
        &self.definition
    }

    fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    fn compile(&self, _site_ids: &[i64]) -> Result<CompiledSegment, SegmentError> {
        let tables = QUALIFIER
            .captures_iter(&self.sql)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect();

        Ok(CompiledSegment {
            sql: self.sql.clone(),
            bind: self.bind.clone(),
            tables,
        })
    }
}

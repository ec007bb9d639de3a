//! Materialized segment membership.
//!
//! During one archiving run many queries share the same period, sites and
//! segment. The matching visit ids are written once into a session-scoped
//! temporary table and later queries join against it.

use std::collections::BTreeSet;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, warn};

use crate::cache::{compute_hash, SHORT_HASH_LEN};
use crate::sql::{
    ColumnDef, CreateTable, DataType, DropTable, Insert, OnConflict, Query,
};
use crate::value::Value;

use super::error::QueryResult;

/// Name prefix of segment tables.
pub const SEGMENT_TABLE_PREFIX: &str = "logtmpsegment";

/// Rows per literal INSERT when filling a segment table without `INSERT ... SELECT`.
pub const LITERAL_INSERT_CHUNK: usize = 500;

/// Deterministic segment table name for a fill query.
///
/// Identical (bind parameters, segment) pairs map to the same table, so
/// duplicate requests on one connection reuse it.
pub fn segment_table_name(bind: &[Value], segment_sql: &str) -> QueryResult<String> {
    let mut hash = compute_hash(&(bind, segment_sql))?;
    hash.truncate(SHORT_HASH_LEN);
    Ok(format!("{}{}", SEGMENT_TABLE_PREFIX, hash))
}

/// Segment tables created by one aggregator.
///
/// Tables another aggregator created on the same connection are used but
/// never registered, so `drop_all` leaves them alone.
#[derive(Debug, Default)]
pub struct SegmentTableRegistry {
    tables: BTreeSet<String>,
}

impl SegmentTableRegistry {
    pub fn register(&mut self, name: String) {
        self.tables.insert(name);
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop every registered table.
    pub fn drop_all(&mut self, conn: &Connection) -> QueryResult<()> {
        for name in std::mem::take(&mut self.tables) {
            conn.execute(&DropTable::new(&name).temporary().to_sql(), [])?;
            debug!(table = %name, "dropped segment table");
        }
        Ok(())
    }
}

/// Scoped dirty-read isolation for a connection.
///
/// SQLite only honors `read_uncommitted` for shared-cache connections. The
/// previous value is restored on [`TransactionLevel::restore`] or drop.
pub struct TransactionLevel<'c> {
    conn: &'c Connection,
    previous: Option<i64>,
}

impl<'c> TransactionLevel<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            previous: None,
        }
    }

    /// Try to allow uncommitted reads. Returns false when the connection
    /// does not accept the setting.
    pub fn lower(&mut self) -> bool {
        let previous: i64 = match self
            .conn
            .pragma_query_value(None, "read_uncommitted", |row| row.get(0))
        {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "cannot read isolation level");
                return false;
            }
        };

        if let Err(e) = self.conn.pragma_update(None, "read_uncommitted", 1) {
            debug!(error = %e, "cannot lower isolation level");
            return false;
        }

        match self
            .conn
            .pragma_query_value(None, "read_uncommitted", |row| row.get::<_, i64>(0))
        {
            Ok(1) => {
                self.previous = Some(previous);
                true
            }
            _ => {
                self.previous = Some(previous);
                self.restore();
                false
            }
        }
    }

    pub fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = self.conn.pragma_update(None, "read_uncommitted", previous) {
                warn!(error = %e, "failed to restore isolation level");
            }
        }
    }
}

impl Drop for TransactionLevel<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Whether a temporary table exists on this connection.
pub fn temp_table_exists(conn: &Connection, name: &str) -> QueryResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_temp_master WHERE type = 'table' AND name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Create and fill a segment table from `fill`, which must select one
/// `idvisit` column.
///
/// Returns false without touching the table when it already exists on the
/// connection, possibly created by another aggregator.
pub fn create_segment_table(
    conn: &Connection,
    name: &str,
    fill: Query,
    bind: &[Value],
    lower_isolation: bool,
) -> QueryResult<bool> {
    if temp_table_exists(conn, name)? {
        debug!(table = %name, "segment table already exists");
        return Ok(false);
    }

    let create = CreateTable::new(name)
        .temporary()
        .if_not_exists()
        .column(ColumnDef::new("idvisit", DataType::Integer).not_null())
        .primary_key(["idvisit"]);
    conn.execute(&create.to_sql(), [])?;

    let mut level = TransactionLevel::new(conn);
    if lower_isolation && level.lower() {
        let insert = Insert::into(name)
            .columns(["idvisit"])
            .on_conflict(OnConflict::Ignore)
            .from_select(fill);
        let rows = conn.execute(&insert.to_sql(), params_from_iter(bind.iter()))?;
        level.restore();
        info!(table = %name, rows, path = "insert_select", "created segment table");
        return Ok(true);
    }

    let ids = {
        let mut stmt = conn.prepare(&fill.to_sql())?;
        let ids = stmt
            .query_map(params_from_iter(bind.iter()), |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    for chunk in ids.chunks(LITERAL_INSERT_CHUNK) {
        let insert = Insert::into(name)
            .columns(["idvisit"])
            .on_conflict(OnConflict::Ignore)
            .literal_rows(chunk.iter().map(|id| vec![id.to_string()]).collect());
        conn.execute(&insert.to_sql(), [])?;
    }
    info!(table = %name, rows = ids.len(), path = "literal", "created segment table");

    Ok(true)
}

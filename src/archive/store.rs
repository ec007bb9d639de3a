//! SQLite archive storage.
//!
//! Owns the connection, the table naming scheme and the blob compressor.
//! Shard tables are created the first time a period of their month is
//! written.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::StorageSettings;
use crate::sql::ddl::{archive_table, archive_table_index, log_schema, sequence_table, DataType};

use super::compress::{compressor_for, Compressor, ZlibCompressor};
use super::error::{StorageError, StorageResult};
use super::record::{ArchiveStatus, RecordKind};
use super::tables::{ArchiveTableNaming, MonthlyTables};

const WRITE_SAVEPOINT: &str = "tally_write";

/// Write transaction on a shared connection.
///
/// Nests as a savepoint when the caller already holds a transaction,
/// otherwise opens its own. Rolled back on drop unless committed.
pub(crate) struct WriteScope<'c> {
    conn: &'c Connection,
    nested: bool,
    finished: bool,
}

impl<'c> WriteScope<'c> {
    /// `immediate` takes the write lock up front for a top-level scope.
    pub(crate) fn begin(conn: &'c Connection, immediate: bool) -> rusqlite::Result<Self> {
        let nested = !conn.is_autocommit();
        let sql = if nested {
            format!("SAVEPOINT {}", WRITE_SAVEPOINT)
        } else if immediate {
            "BEGIN IMMEDIATE".to_string()
        } else {
            "BEGIN DEFERRED".to_string()
        };
        conn.execute_batch(&sql)?;
        Ok(Self {
            conn,
            nested,
            finished: false,
        })
    }

    pub(crate) fn commit(mut self) -> rusqlite::Result<()> {
        let sql = if self.nested {
            format!("RELEASE {}", WRITE_SAVEPOINT)
        } else {
            "COMMIT".to_string()
        };
        self.conn.execute_batch(&sql)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sql = if self.nested {
            format!("ROLLBACK TO {0}; RELEASE {0}", WRITE_SAVEPOINT)
        } else {
            "ROLLBACK".to_string()
        };
        if let Err(e) = self.conn.execute_batch(&sql) {
            warn!(error = %e, nested = self.nested, "failed to roll back write scope");
        }
    }
}

/// Archive database handle.
pub struct ArchiveStore {
    conn: Connection,
    naming: Box<dyn ArchiveTableNaming>,
    compressor: Box<dyn Compressor>,
    table_prefix: String,
    known_tables: RefCell<HashSet<String>>,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("naming", &self.naming)
            .field("compressor", &self.compressor.name())
            .field("table_prefix", &self.table_prefix)
            .finish()
    }
}

impl ArchiveStore {
    /// Wrap an open connection with the default naming and zlib compression.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            naming: Box::new(MonthlyTables::default()),
            compressor: Box::new(ZlibCompressor::default()),
            table_prefix: String::new(),
            known_tables: RefCell::new(HashSet::new()),
        }
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Ok(Self::new(Connection::open(path)?))
    }

    /// Open the database configured in `[storage]`.
    pub fn from_settings(settings: &StorageSettings) -> StorageResult<Self> {
        let path = settings.resolved_path()?;
        info!(path = %path.display(), compression = settings.blob_compression, "opening archive store");
        Ok(Self::open(path)?
            .with_table_prefix(&settings.table_prefix)
            .with_compressor(compressor_for(settings)))
    }

    /// Use `prefix` for archive, sequence and log tables.
    pub fn with_table_prefix(mut self, prefix: &str) -> Self {
        self.naming = Box::new(MonthlyTables::new(prefix));
        self.table_prefix = prefix.to_string();
        self
    }

    pub fn with_naming(mut self, naming: Box<dyn ArchiveTableNaming>) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_compressor(mut self, compressor: Box<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn naming(&self) -> &dyn ArchiveTableNaming {
        self.naming.as_ref()
    }

    pub fn compressor(&self) -> &dyn Compressor {
        self.compressor.as_ref()
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Create the raw log tables.
    pub fn init_log_schema(&self) -> StorageResult<()> {
        for statement in log_schema(&self.table_prefix) {
            self.conn.execute(&statement, [])?;
        }
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> StorageResult<bool> {
        if self.known_tables.borrow().contains(name) {
            return Ok(true);
        }
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [name],
            |row| row.get(0),
        )?;
        if count > 0 {
            self.known_tables.borrow_mut().insert(name.to_string());
        }
        Ok(count > 0)
    }

    /// Create the `kind` shard holding `date` if needed and return its name.
    pub fn ensure_archive_table(&self, kind: RecordKind, date: NaiveDate) -> StorageResult<String> {
        let name = self.naming.table_for(kind, date);
        if self.known_tables.borrow().contains(&name) {
            return Ok(name);
        }

        let value_type = match kind {
            RecordKind::Numeric => DataType::Numeric,
            RecordKind::Blob => DataType::Blob,
        };
        self.conn.execute(&archive_table(&name, value_type).to_sql(), [])?;
        self.conn.execute(&archive_table_index(&name).to_sql(), [])?;
        debug!(table = %name, kind = kind.label(), "archive table ready");

        self.known_tables.borrow_mut().insert(name.clone());
        Ok(name)
    }

    /// Allocate the next archive id of a numeric shard.
    ///
    /// The sequence row is seeded from the shard's current maximum id and
    /// incremented inside a [`WriteScope`].
    pub fn allocate_archive_id(&self, numeric_table: &str) -> StorageResult<i64> {
        let sequence = self.naming.sequence_table();
        let allocation_error = |e: rusqlite::Error| StorageError::ArchiveIdAllocation {
            table: numeric_table.to_string(),
            reason: e.to_string(),
        };

        self.conn
            .execute(&sequence_table(&sequence).to_sql(), [])
            .map_err(allocation_error)?;

        let scope = WriteScope::begin(&self.conn, true).map_err(allocation_error)?;
        self.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (name, value) SELECT ?, COALESCE(MAX(idarchive), 0) FROM {}",
                    sequence, numeric_table
                ),
                [numeric_table],
            )
            .map_err(allocation_error)?;
        let id: i64 = self
            .conn
            .query_row(
                &format!(
                    "UPDATE {} SET value = value + 1 WHERE name = ? RETURNING value",
                    sequence
                ),
                [numeric_table],
                |row| row.get(0),
            )
            .map_err(allocation_error)?;
        scope.commit().map_err(allocation_error)?;

        Ok(id)
    }

    /// Mark every done flag of an archive with `status`. Used by the
    /// invalidation side; returns the number of flags changed.
    pub fn set_archive_status(
        &self,
        numeric_table: &str,
        id_archive: i64,
        status: ArchiveStatus,
    ) -> StorageResult<usize> {
        if !self.table_exists(numeric_table)? {
            return Ok(0);
        }
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET value = ? WHERE idarchive = ? AND (name LIKE 'done%' OR name LIKE '%\\_done%' ESCAPE '\\')",
                numeric_table
            ),
            rusqlite::params![status.value(), id_archive],
        )?;
        Ok(changed)
    }
}

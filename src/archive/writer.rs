//! Archive writer.
//!
//! One writer persists one archive:
//!
//! ```text
//! new --init_new_archive--> allocated (flag = error)
//!     --insert_*----------> records spooled, flushed every MAX_SPOOL_SIZE
//!     --finalize_archive--> finalized (flag = ok)
//! ```
//!
//! A writer dropped before finalizing leaves its flag at `error`, which
//! selectors never pick up.

use chrono::{NaiveDateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use tracing::{debug, info, warn};

use crate::period::{format_date, format_datetime};
use crate::report::ReportTable;
use crate::sql::dml::{Insert, OnConflict, Update};
use crate::value::Value;

use super::chunk::{encode_chunk, split_into_chunks};
use super::error::{StorageError, StorageResult};
use super::record::{validate_record_name, ArchiveStatus, BlobRecord, RecordKind, SpooledValue};
use super::report_blob::encode_report;
use super::store::{ArchiveStore, WriteScope};
use super::ArchiveParams;

/// Records buffered per kind before a flush is forced.
pub const MAX_SPOOL_SIZE: usize = 50;

const ARCHIVE_COLUMNS: [&str; 8] = [
    "idarchive",
    "name",
    "idsite",
    "date1",
    "date2",
    "period",
    "ts_archived",
    "value",
];

impl ToSql for SpooledValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SpooledValue::Numeric(value) => value.to_sql(),
            SpooledValue::Blob(bytes) => Ok(ToSqlOutput::Borrowed(ValueRef::Blob(bytes))),
        }
    }
}

#[derive(Debug)]
enum WriterState {
    New,
    Allocated {
        id_archive: i64,
        numeric_table: String,
        blob_table: String,
    },
    Finalized {
        id_archive: i64,
    },
}

impl WriterState {
    fn label(&self) -> &'static str {
        match self {
            WriterState::New => "not initialized",
            WriterState::Allocated { .. } => "in progress",
            WriterState::Finalized { .. } => "finalized",
        }
    }
}

/// Writes the records of one archive and flips its completion flag.
#[derive(Debug)]
pub struct ArchiveWriter<'s> {
    store: &'s ArchiveStore,
    params: ArchiveParams,
    ts_archived: NaiveDateTime,
    state: WriterState,
    numeric_spool: Vec<(String, SpooledValue)>,
    blob_spool: Vec<(String, SpooledValue)>,
}

impl<'s> ArchiveWriter<'s> {
    pub fn new(store: &'s ArchiveStore, params: ArchiveParams) -> Self {
        Self {
            store,
            params,
            ts_archived: Utc::now().naive_utc(),
            state: WriterState::New,
            numeric_spool: Vec::new(),
            blob_spool: Vec::new(),
        }
    }

    /// Override the processing timestamp stored with every record.
    pub fn with_ts_archived(mut self, ts: NaiveDateTime) -> Self {
        self.ts_archived = ts;
        self
    }

    pub fn params(&self) -> &ArchiveParams {
        &self.params
    }

    /// The allocated archive id, once `init_new_archive` succeeded.
    pub fn id_archive(&self) -> Option<i64> {
        match &self.state {
            WriterState::New => None,
            WriterState::Allocated { id_archive, .. } | WriterState::Finalized { id_archive } => {
                Some(*id_archive)
            }
        }
    }

    /// Allocate an archive id and persist the completion flag as `error`.
    pub fn init_new_archive(&mut self) -> StorageResult<i64> {
        if !matches!(self.state, WriterState::New) {
            return Err(self.invalid_state("initialize"));
        }

        let start = self.params.period.start;
        let numeric_table = self.store.ensure_archive_table(RecordKind::Numeric, start)?;
        let blob_table = self.store.ensure_archive_table(RecordKind::Blob, start)?;
        let id_archive = self.store.allocate_archive_id(&numeric_table)?;

        let flag = self.params.done_flag();
        let sql = Insert::into(numeric_table.as_str())
            .columns(ARCHIVE_COLUMNS)
            .on_conflict(OnConflict::Replace)
            .to_sql();
        let status = SpooledValue::Numeric(Value::Int(ArchiveStatus::Error.value()));
        let row = self.row_params(id_archive, &flag, &status);
        self.store
            .connection()
            .execute(&sql, rusqlite::params_from_iter(row.iter()))?;

        info!(
            id_archive,
            table = %numeric_table,
            site = self.params.site_id,
            period = %self.params.period,
            flag = %flag,
            "archive id allocated"
        );
        self.state = WriterState::Allocated {
            id_archive,
            numeric_table,
            blob_table,
        };
        Ok(id_archive)
    }

    /// Queue a record. Zero-like values are skipped; numeric values (numeric
    /// strings included) go to the numeric table, anything else is stored as
    /// a compressed blob.
    pub fn insert_record(&mut self, name: &str, value: impl Into<Value>) -> StorageResult<()> {
        self.ensure_allocated("insert a record")?;
        validate_record_name(name)?;

        let value = value.into();
        if value.is_zero_like() {
            return Ok(());
        }

        if value.is_numeric() {
            let number = if matches!(value, Value::Text(_)) {
                match value.as_i64() {
                    Some(i) => Value::Int(i),
                    None => value.as_f64().map(Value::Float).unwrap_or(value),
                }
            } else {
                value
            };
            self.spool(RecordKind::Numeric, name, SpooledValue::Numeric(number))
        } else {
            let bytes = self.store.compressor().encode(value.to_string().as_bytes())?;
            self.spool(RecordKind::Blob, name, SpooledValue::Blob(bytes))
        }
    }

    /// Queue a blob record.
    ///
    /// For [`BlobRecord::Tables`] the root table (id 0) is stored under
    /// `name` and every other table is packed into chunk records.
    pub fn insert_blob_record(&mut self, name: &str, record: BlobRecord) -> StorageResult<()> {
        self.ensure_allocated("insert a blob record")?;
        validate_record_name(name)?;

        match record {
            BlobRecord::Single(bytes) => {
                if bytes.is_empty() {
                    return Ok(());
                }
                let encoded = self.store.compressor().encode(&bytes)?;
                self.spool(RecordKind::Blob, name, SpooledValue::Blob(encoded))
            }
            BlobRecord::Tables(mut tables) => {
                if let Some(root) = tables.remove(&0) {
                    if !root.is_empty() {
                        let encoded = self.store.compressor().encode(&root)?;
                        self.spool(RecordKind::Blob, name, SpooledValue::Blob(encoded))?;
                    }
                }
                for (chunk_name, chunk) in split_into_chunks(name, tables) {
                    let encoded = self.store.compressor().encode(&encode_chunk(&chunk)?)?;
                    self.spool(RecordKind::Blob, &chunk_name, SpooledValue::Blob(encoded))?;
                }
                Ok(())
            }
        }
    }

    /// Serialize a report tree and queue it as a blob record.
    pub fn insert_report(&mut self, name: &str, report: &ReportTable) -> StorageResult<()> {
        let tables = encode_report(report)?;
        self.insert_blob_record(name, BlobRecord::Tables(tables))
    }

    /// Write every queued record.
    pub fn flush_spools(&mut self) -> StorageResult<()> {
        self.flush_spool(RecordKind::Numeric)?;
        self.flush_spool(RecordKind::Blob)
    }

    /// Write the queued records of one kind.
    pub fn flush_spool(&mut self, kind: RecordKind) -> StorageResult<()> {
        let (id_archive, table) = match &self.state {
            WriterState::Allocated {
                id_archive,
                numeric_table,
                blob_table,
            } => (
                *id_archive,
                match kind {
                    RecordKind::Numeric => numeric_table.clone(),
                    RecordKind::Blob => blob_table.clone(),
                },
            ),
            _ => return Err(self.invalid_state("flush")),
        };

        let entries = std::mem::take(self.spool_mut(kind));
        if entries.is_empty() {
            return Ok(());
        }

        let insert = Insert::into(table.as_str())
            .columns(ARCHIVE_COLUMNS)
            .on_conflict(OnConflict::Replace);
        let conn = self.store.connection();

        if entries.len() == 1 {
            let (name, value) = &entries[0];
            let row = self.row_params(id_archive, name, value);
            conn.execute(&insert.to_sql(), rusqlite::params_from_iter(row.iter()))?;
        } else {
            match kind {
                RecordKind::Numeric => {
                    let sql = insert.placeholder_rows(entries.len()).to_sql();
                    let mut bind = Vec::with_capacity(entries.len() * ARCHIVE_COLUMNS.len());
                    for (name, value) in &entries {
                        bind.extend(self.row_params(id_archive, name, value));
                    }
                    conn.execute(&sql, rusqlite::params_from_iter(bind.iter()))?;
                }
                RecordKind::Blob => {
                    let scope = WriteScope::begin(conn, false)?;
                    {
                        let mut stmt = conn.prepare(&insert.to_sql())?;
                        for (name, value) in &entries {
                            let row = self.row_params(id_archive, name, value);
                            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                        }
                    }
                    scope.commit()?;
                }
            }
        }

        debug!(id_archive, table = %table, kind = kind.label(), rows = entries.len(), "spool flushed");
        Ok(())
    }

    /// Flush every spool and mark the archive as done. Returns its id.
    pub fn finalize_archive(&mut self) -> StorageResult<i64> {
        self.flush_spools()?;

        let (id_archive, numeric_table) = match &self.state {
            WriterState::Allocated {
                id_archive,
                numeric_table,
                ..
            } => (*id_archive, numeric_table.clone()),
            _ => return Err(self.invalid_state("finalize")),
        };

        let flag = self.params.done_flag();
        let sql = Update::table(numeric_table.as_str())
            .set(["value"])
            .filter("idarchive = ? AND name = ?")
            .to_sql();
        self.store.connection().execute(
            &sql,
            rusqlite::params![ArchiveStatus::Ok.value(), id_archive, flag],
        )?;

        info!(id_archive, table = %numeric_table, flag = %flag, "archive finalized");
        self.state = WriterState::Finalized { id_archive };
        Ok(id_archive)
    }

    fn spool(&mut self, kind: RecordKind, name: &str, value: SpooledValue) -> StorageResult<()> {
        let spool = self.spool_mut(kind);
        spool.push((name.to_string(), value));
        if spool.len() >= MAX_SPOOL_SIZE {
            self.flush_spool(kind)?;
        }
        Ok(())
    }

    fn spool_mut(&mut self, kind: RecordKind) -> &mut Vec<(String, SpooledValue)> {
        match kind {
            RecordKind::Numeric => &mut self.numeric_spool,
            RecordKind::Blob => &mut self.blob_spool,
        }
    }

    fn row_params<'v>(
        &self,
        id_archive: i64,
        name: &'v str,
        value: &'v SpooledValue,
    ) -> Vec<Box<dyn ToSql + 'v>> {
        let period = self.params.period;
        vec![
            Box::new(id_archive),
            Box::new(name),
            Box::new(self.params.site_id),
            Box::new(format_date(period.start)),
            Box::new(format_date(period.end)),
            Box::new(period.kind.id()),
            Box::new(format_datetime(self.ts_archived)),
            Box::new(value),
        ]
    }

    fn ensure_allocated(&self, operation: &'static str) -> StorageResult<()> {
        match self.state {
            WriterState::Allocated { .. } => Ok(()),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> StorageError {
        StorageError::InvalidState {
            operation,
            state: self.state.label(),
        }
    }
}

impl Drop for ArchiveWriter<'_> {
    fn drop(&mut self) {
        if let WriterState::Allocated { id_archive, .. } = self.state {
            let pending = self.numeric_spool.len() + self.blob_spool.len();
            warn!(id_archive, pending, "archive writer dropped before finalize");
        }
    }
}

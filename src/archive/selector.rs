//! Archive selection.
//!
//! Finds completed archives without recomputing anything and reads their
//! records back, unpacking chunked subtables on the way. A missing archive
//! or shard is "no data", never an error.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use tracing::{debug, warn};

use crate::cache::ArchiveIdCache;
use crate::period::{format_date, format_datetime, Period};
use crate::report::ReportTable;
use crate::value::Value;

use super::chunk::{chunk_record_name, decode_chunk, parse_chunk_name, ChunkTables};
use super::error::{StorageError, StorageResult};
use super::record::{
    all_plugins_done_flag, done_flags_for_plugin, ArchiveStatus, RecordKind, NB_VISITS,
    NB_VISITS_CONVERTED, VISITS_SUMMARY_PLUGIN,
};
use super::report_blob::decode_report;
use super::store::ArchiveStore;
use super::{ArchiveIdAndVisits, ArchiveParams};

/// Periods starting later than this many days after today have no shard.
const FUTURE_PERIOD_DAYS: u64 = 2;

/// Archive ids grouped by `(date1, date2)`.
pub type ArchiveIds = BTreeMap<(NaiveDate, NaiveDate), Vec<i64>>;

/// Which subtables of a blob record to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubtableSelection {
    /// The record itself.
    #[default]
    None,
    /// One subtable; 0 is the root table.
    Id(i64),
    /// Every subtable, root excluded.
    All,
}

/// Filters applied when resolving archives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorOptions {
    /// Only accept archives processed at or after this timestamp.
    pub min_ts_archived: Option<NaiveDateTime>,
    /// Accept invalidated archives as done.
    pub include_invalidated: bool,
}

/// Payload of one selected record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Numeric(Value),
    /// Decompressed blob.
    Blob(Vec<u8>),
}

/// One logical record read from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveDataRow {
    pub id_archive: i64,
    pub idsite: i64,
    pub date1: NaiveDate,
    pub date2: NaiveDate,
    /// Requested record name; chunk and subtable suffixes are stripped.
    pub name: String,
    pub subtable_id: Option<i64>,
    pub data: RecordData,
}

/// Reads completed archives from an [`ArchiveStore`].
#[derive(Debug)]
pub struct ArchiveSelector<'s> {
    store: &'s ArchiveStore,
    options: SelectorOptions,
    today: NaiveDate,
}

impl<'s> ArchiveSelector<'s> {
    pub fn new(store: &'s ArchiveStore) -> Self {
        Self {
            store,
            options: SelectorOptions::default(),
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_options(mut self, options: SelectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Date used to decide which periods are in the future.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn options(&self) -> &SelectorOptions {
        &self.options
    }

    /// Resolve the latest done archive for `params` and the visit counts of
    /// its period.
    ///
    /// The archive of the requested plugin and the `VisitsSummary` archive
    /// are resolved separately; visit counts come from either one. Returns
    /// `None` when no done archive of the requested plugin exists.
    pub fn get_archive_id_and_visits(
        &self,
        params: &ArchiveParams,
    ) -> StorageResult<Option<ArchiveIdAndVisits>> {
        let table = self.store.naming().numeric_table_for(params.period.start);
        if !self.store.table_exists(&table)? {
            debug!(table = %table, "archive shard missing");
            return Ok(None);
        }

        let requested_flags = match &params.plugin {
            Some(plugin) => done_flags_for_plugin(&params.segment, plugin),
            None => vec![all_plugins_done_flag(&params.segment)],
        };
        let visits_flags = done_flags_for_plugin(&params.segment, VISITS_SUMMARY_PLUGIN);
        let flags: BTreeSet<&str> = requested_flags
            .iter()
            .chain(visits_flags.iter())
            .map(String::as_str)
            .collect();
        let statuses = self.statuses();

        let mut bind: Vec<Value> = vec![
            params.site_id.into(),
            format_date(params.period.start).into(),
            format_date(params.period.end).into(),
            params.period.kind.id().into(),
        ];
        bind.extend(flags.iter().map(|f| Value::from(*f)));
        bind.extend(statuses.iter().map(|s| Value::from(s.value())));
        bind.push(NB_VISITS.into());
        bind.push(NB_VISITS_CONVERTED.into());

        let mut sql = format!(
            "SELECT idarchive, name, value FROM {}
WHERE idsite = ? AND date1 = ? AND date2 = ? AND period = ?
AND ((name IN ({}) AND value IN ({})) OR name IN (?, ?))",
            table,
            placeholders(flags.len()),
            placeholders(statuses.len())
        );
        if let Some(ts) = self.options.min_ts_archived {
            sql.push_str(" AND ts_archived >= ?");
            bind.push(format_datetime(ts).into());
        }
        sql.push_str("\nORDER BY idarchive DESC");

        let mut stmt = self.store.connection().prepare(&sql)?;
        let mut rows: Vec<(i64, String, Value)> = stmt
            .query_map(rusqlite::params_from_iter(bind.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<_, _>>()?;
        rows.sort_by(|a, b| b.0.cmp(&a.0));

        let first_done = |names: &[String]| {
            rows.iter()
                .find(|(_, name, _)| names.iter().any(|n| n == name))
                .map(|(id, _, _)| *id)
        };
        let Some(id_archive) = first_done(requested_flags.as_slice()) else {
            return Ok(None);
        };
        let visits_archive = first_done(visits_flags.as_slice());

        let count = |record: &str| {
            rows.iter()
                .filter(|(id, _, _)| *id == id_archive || Some(*id) == visits_archive)
                .find(|(_, name, _)| name == record)
                .and_then(|(_, _, value)| value.as_i64())
                .unwrap_or(0)
        };

        Ok(Some(ArchiveIdAndVisits {
            id_archive,
            visits: count(NB_VISITS),
            visits_converted: count(NB_VISITS_CONVERTED),
        }))
    }

    /// Same as [`get_archive_id_and_visits`](Self::get_archive_id_and_visits),
    /// answered from `cache` when possible.
    pub fn get_archive_id_and_visits_cached(
        &self,
        params: &ArchiveParams,
        cache: &mut ArchiveIdCache,
    ) -> StorageResult<Option<ArchiveIdAndVisits>> {
        if let Some(cached) = cache.get(params) {
            return Ok(cached);
        }
        let resolved = self.get_archive_id_and_visits(params)?;
        cache.insert(params, resolved);
        Ok(resolved)
    }

    /// Latest done archive ids of many sites and periods.
    ///
    /// For every `(site, date1, date2, flag)` only the highest archive id is
    /// kept. Periods starting more than two days after today are skipped.
    pub fn get_archive_ids(
        &self,
        site_ids: &[i64],
        periods: &[Period],
        segment: &str,
        plugins: &[&str],
    ) -> StorageResult<ArchiveIds> {
        let mut result = ArchiveIds::new();
        if site_ids.is_empty() || periods.is_empty() {
            return Ok(result);
        }

        let mut flags: BTreeSet<String> = plugins
            .iter()
            .flat_map(|plugin| done_flags_for_plugin(segment, plugin))
            .collect();
        flags.insert(all_plugins_done_flag(segment));

        let horizon = self.today + Days::new(FUTURE_PERIOD_DAYS);
        let mut by_table: BTreeMap<String, Vec<Period>> = BTreeMap::new();
        for period in periods {
            if period.start > horizon {
                debug!(period = %period, "skipping period in the future");
                continue;
            }
            by_table
                .entry(self.store.naming().numeric_table_for(period.start))
                .or_default()
                .push(*period);
        }

        let statuses = self.statuses();
        for (table, periods) in by_table {
            if !self.store.table_exists(&table)? {
                debug!(table = %table, "archive shard missing");
                continue;
            }

            let mut bind: Vec<Value> = site_ids.iter().map(|id| Value::Int(*id)).collect();
            let mut period_conditions = Vec::with_capacity(periods.len());
            for period in &periods {
                period_conditions.push("(date1 = ? AND date2 = ? AND period = ?)");
                bind.push(format_date(period.start).into());
                bind.push(format_date(period.end).into());
                bind.push(period.kind.id().into());
            }
            bind.extend(flags.iter().map(|f| Value::from(f.as_str())));
            bind.extend(statuses.iter().map(|s| Value::from(s.value())));

            let mut sql = format!(
                "SELECT idsite, date1, date2, MAX(idarchive) AS idarchive FROM {}
WHERE idsite IN ({}) AND ({}) AND name IN ({}) AND value IN ({})",
                table,
                placeholders(site_ids.len()),
                period_conditions.join(" OR "),
                placeholders(flags.len()),
                placeholders(statuses.len())
            );
            if let Some(ts) = self.options.min_ts_archived {
                sql.push_str(" AND ts_archived >= ?");
                bind.push(format_datetime(ts).into());
            }
            sql.push_str("\nGROUP BY idsite, date1, date2, name");

            let mut stmt = self.store.connection().prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            for row in rows {
                let (date1, date2, id) = row?;
                match (parse_date(&date1), parse_date(&date2)) {
                    (Some(d1), Some(d2)) => result.entry((d1, d2)).or_default().push(id),
                    _ => warn!(table = %table, date1 = %date1, date2 = %date2, "unparseable archive dates"),
                }
            }
        }

        for ids in result.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        Ok(result)
    }

    /// Read records of the given archives.
    ///
    /// Blob payloads are decompressed. A blob or chunk that fails to decode
    /// yields no rows; the other records are still returned.
    pub fn get_archive_data(
        &self,
        archive_ids: &ArchiveIds,
        names: &[&str],
        kind: RecordKind,
        subtable: SubtableSelection,
    ) -> StorageResult<Vec<ArchiveDataRow>> {
        if kind == RecordKind::Numeric && subtable != SubtableSelection::None {
            return Err(StorageError::AmbiguousRecordRequest(
                "subtables are only stored as blob records".to_string(),
            ));
        }

        let mut result = Vec::new();
        if names.is_empty() {
            return Ok(result);
        }

        for (&(date1, date2), ids) in archive_ids {
            if ids.is_empty() {
                continue;
            }
            let table = self.store.naming().table_for(kind, date1);
            if !self.store.table_exists(&table)? {
                continue;
            }

            let mut bind: Vec<Value> = ids.iter().map(|id| Value::Int(*id)).collect();
            let name_condition = match subtable {
                SubtableSelection::None | SubtableSelection::Id(0) => {
                    bind.extend(names.iter().map(|n| Value::from(*n)));
                    format!("name IN ({})", placeholders(names.len()))
                }
                SubtableSelection::Id(id) => {
                    for name in names {
                        bind.push(format!("{}_{}", name, id).into());
                        bind.push(chunk_record_name(name, id).into());
                    }
                    format!("name IN ({})", placeholders(names.len() * 2))
                }
                SubtableSelection::All => {
                    let mut conditions = Vec::with_capacity(names.len());
                    for name in names {
                        let prefix = format!("{}_", name);
                        bind.push(Value::Int(prefix.chars().count() as i64));
                        bind.push(prefix.into());
                        conditions.push("substr(name, 1, ?) = ?");
                    }
                    format!("({})", conditions.join(" OR "))
                }
            };

            let sql = format!(
                "SELECT idarchive, idsite, name, value FROM {}\nWHERE idarchive IN ({}) AND {}",
                table,
                placeholders(ids.len()),
                name_condition
            );
            let mut stmt = self.store.connection().prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params_from_iter(bind.iter()))?;
            while let Some(row) = rows.next()? {
                let id_archive: i64 = row.get(0)?;
                let idsite: i64 = row.get(1)?;
                let name: String = row.get(2)?;
                let base = DataRowBase {
                    id_archive,
                    idsite,
                    date1,
                    date2,
                };

                match kind {
                    RecordKind::Numeric => {
                        result.push(base.row(&name, None, RecordData::Numeric(row.get(3)?)));
                    }
                    RecordKind::Blob => {
                        let raw = match row.get_ref(3)? {
                            ValueRef::Blob(b) | ValueRef::Text(b) => b.to_vec(),
                            _ => continue,
                        };
                        let bytes = match self.store.compressor().decode(&raw) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!(id_archive, record = %name, error = %e, "skipping unreadable blob");
                                continue;
                            }
                        };
                        self.expand_blob(&base, &name, bytes, names, subtable, &mut result);
                    }
                }
            }
        }

        result.sort_by(|a, b| {
            (a.date1, a.id_archive, &a.name, a.subtable_id)
                .cmp(&(b.date1, b.id_archive, &b.name, b.subtable_id))
        });
        Ok(result)
    }

    /// Resolve the archive for `params` and rebuild the report stored under
    /// `name`. `None` when there is no archive, no such record, or the
    /// record cannot be decoded.
    pub fn load_report(
        &self,
        params: &ArchiveParams,
        name: &str,
    ) -> StorageResult<Option<ReportTable>> {
        let Some(archive) = self.get_archive_id_and_visits(params)? else {
            return Ok(None);
        };
        let mut ids = ArchiveIds::new();
        ids.insert(
            (params.period.start, params.period.end),
            vec![archive.id_archive],
        );

        let root = self
            .get_archive_data(&ids, &[name], RecordKind::Blob, SubtableSelection::None)?
            .into_iter()
            .find_map(|row| match row.data {
                RecordData::Blob(bytes) => Some(bytes),
                RecordData::Numeric(_) => None,
            });
        let Some(root) = root else {
            return Ok(None);
        };

        let subtables: ChunkTables = self
            .get_archive_data(&ids, &[name], RecordKind::Blob, SubtableSelection::All)?
            .into_iter()
            .filter_map(|row| match (row.subtable_id, row.data) {
                (Some(id), RecordData::Blob(bytes)) => Some((id, bytes)),
                _ => None,
            })
            .collect();

        match decode_report(&root, &subtables) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!(id_archive = archive.id_archive, record = name, error = %e, "report blob is corrupt");
                Ok(None)
            }
        }
    }

    fn expand_blob(
        &self,
        base: &DataRowBase,
        stored_name: &str,
        bytes: Vec<u8>,
        names: &[&str],
        subtable: SubtableSelection,
        out: &mut Vec<ArchiveDataRow>,
    ) {
        match subtable {
            SubtableSelection::None | SubtableSelection::Id(0) => {
                out.push(base.row(stored_name, None, RecordData::Blob(bytes)));
            }
            SubtableSelection::Id(id) => {
                for name in names {
                    if stored_name == format!("{}_{}", name, id) {
                        out.push(base.row(name, Some(id), RecordData::Blob(bytes)));
                        return;
                    }
                    if stored_name == chunk_record_name(name, id) {
                        if let Some(mut chunk) = decode_chunk_logged(base, stored_name, &bytes) {
                            if let Some(table) = chunk.remove(&id) {
                                out.push(base.row(name, Some(id), RecordData::Blob(table)));
                            }
                        }
                        return;
                    }
                }
            }
            SubtableSelection::All => {
                for name in names {
                    let Some(suffix) = stored_name
                        .strip_prefix(*name)
                        .and_then(|rest| rest.strip_prefix('_'))
                    else {
                        continue;
                    };
                    if let Some((chunk_base, _, _)) = parse_chunk_name(stored_name) {
                        if chunk_base == *name {
                            if let Some(chunk) = decode_chunk_logged(base, stored_name, &bytes) {
                                for (id, table) in chunk {
                                    out.push(base.row(name, Some(id), RecordData::Blob(table)));
                                }
                            }
                            return;
                        }
                    }
                    if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                        if let Ok(id) = suffix.parse::<i64>() {
                            out.push(base.row(name, Some(id), RecordData::Blob(bytes)));
                            return;
                        }
                    }
                }
            }
        }
    }

    fn statuses(&self) -> Vec<ArchiveStatus> {
        ArchiveStatus::selectable(self.options.include_invalidated)
    }
}

struct DataRowBase {
    id_archive: i64,
    idsite: i64,
    date1: NaiveDate,
    date2: NaiveDate,
}

impl DataRowBase {
    fn row(&self, name: &str, subtable_id: Option<i64>, data: RecordData) -> ArchiveDataRow {
        ArchiveDataRow {
            id_archive: self.id_archive,
            idsite: self.idsite,
            date1: self.date1,
            date2: self.date2,
            name: name.to_string(),
            subtable_id,
            data,
        }
    }
}

fn decode_chunk_logged(base: &DataRowBase, name: &str, bytes: &[u8]) -> Option<ChunkTables> {
    match decode_chunk(bytes) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!(id_archive = base.id_archive, record = %name, error = %e, "skipping unreadable chunk");
            None
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

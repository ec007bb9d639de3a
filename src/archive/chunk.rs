//! Chunked subtable storage.
//!
//! Subtables of a report are not stored one row each. They are grouped
//! by id into chunks of [`TABLES_PER_CHUNK`] and every chunk becomes one
//! blob record named after the id range it covers:
//!
//! ```text
//! Referrers_type_chunk_0_99     -> { 1: .., 2: .., .., 99: .. }
//! Referrers_type_chunk_100_199  -> { 100: .., .. }
//! ```
//!
//! Whether a record is a chunk is decided from its name alone.

use std::collections::BTreeMap;

use super::error::StorageResult;

/// Marker between the record name and the id range of a chunk.
pub const CHUNK_APPENDIX: &str = "_chunk_";

/// Number of subtable ids covered by one chunk.
pub const TABLES_PER_CHUNK: i64 = 100;

/// Subtables of one chunk, keyed by subtable id.
pub type ChunkTables = BTreeMap<i64, Vec<u8>>;

/// First and last subtable id of the chunk holding `table_id`.
pub fn chunk_range(table_id: i64) -> (i64, i64) {
    let start = table_id.div_euclid(TABLES_PER_CHUNK) * TABLES_PER_CHUNK;
    (start, start + TABLES_PER_CHUNK - 1)
}

/// Name of the chunk record of `record` that holds `table_id`.
pub fn chunk_record_name(record: &str, table_id: i64) -> String {
    let (start, end) = chunk_range(table_id);
    format!("{}{}{}_{}", record, CHUNK_APPENDIX, start, end)
}

/// Split a chunk record name into its record name and id range.
pub fn parse_chunk_name(name: &str) -> Option<(&str, i64, i64)> {
    let pos = name.rfind(CHUNK_APPENDIX)?;
    let (start, end) = name[pos + CHUNK_APPENDIX.len()..].split_once('_')?;
    if start.is_empty() || end.is_empty() {
        return None;
    }
    if !start.bytes().all(|b| b.is_ascii_digit()) || !end.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((&name[..pos], start.parse().ok()?, end.parse().ok()?))
}

pub fn is_chunk_record(name: &str) -> bool {
    parse_chunk_name(name).is_some()
}

/// Group subtables by the chunk record they belong to.
pub fn split_into_chunks(record: &str, tables: ChunkTables) -> BTreeMap<String, ChunkTables> {
    let mut chunks: BTreeMap<String, ChunkTables> = BTreeMap::new();
    for (id, blob) in tables {
        chunks
            .entry(chunk_record_name(record, id))
            .or_default()
            .insert(id, blob);
    }
    chunks
}

pub fn encode_chunk(tables: &ChunkTables) -> StorageResult<Vec<u8>> {
    Ok(bincode::serialize(tables)?)
}

pub fn decode_chunk(bytes: &[u8]) -> StorageResult<ChunkTables> {
    Ok(bincode::deserialize(bytes)?)
}

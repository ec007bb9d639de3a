//! Report tree serialization.
//!
//! A report tree is flattened into one JSON table per node. The root is
//! table 0 and subtables are numbered depth-first from 1; a row points at
//! its subtable through `idsubdatatable`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::report::{ReportTable, Row};
use crate::value::Value;

use super::chunk::ChunkTables;
use super::error::StorageResult;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    columns: Vec<(String, Value)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idsubdatatable: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTable {
    rows: Vec<StoredRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary_row: Option<StoredRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    totals_row: Option<StoredRow>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
}

/// Serialize a report tree into tables keyed by id, root at 0.
pub fn encode_report(report: &ReportTable) -> StorageResult<ChunkTables> {
    let mut out = ChunkTables::new();
    let mut next_id = 1;
    encode_table(report, 0, &mut next_id, &mut out)?;
    Ok(out)
}

fn encode_table(
    table: &ReportTable,
    id: i64,
    next_id: &mut i64,
    out: &mut ChunkTables,
) -> StorageResult<()> {
    let mut encode_row = |row: &Row, out: &mut ChunkTables| -> StorageResult<StoredRow> {
        let idsubdatatable = match row.subtable() {
            Some(sub) => {
                let child = *next_id;
                *next_id += 1;
                encode_table(sub, child, next_id, out)?;
                Some(child)
            }
            None => None,
        };
        Ok(StoredRow {
            columns: row.columns.clone(),
            metadata: row.metadata.clone(),
            idsubdatatable,
        })
    };

    let mut rows = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        rows.push(encode_row(row, out)?);
    }
    let summary_row = match &table.summary_row {
        Some(row) => Some(encode_row(row, out)?),
        None => None,
    };
    let totals_row = table.totals_row.as_ref().map(|row| StoredRow {
        columns: row.columns.clone(),
        metadata: row.metadata.clone(),
        idsubdatatable: None,
    });

    let stored = StoredTable {
        rows,
        summary_row,
        totals_row,
        metadata: table.metadata.clone(),
    };
    out.insert(id, serde_json::to_vec(&stored)?);
    Ok(())
}

/// Rebuild a report tree from its root table and the subtables it references.
///
/// A row only gets a subtable whose id is greater than its own table's id,
/// so corrupted references cannot form cycles. Missing subtables are left
/// out.
pub fn decode_report(root: &[u8], subtables: &ChunkTables) -> StorageResult<ReportTable> {
    decode_table(root, 0, subtables)
}

fn decode_table(bytes: &[u8], id: i64, subtables: &ChunkTables) -> StorageResult<ReportTable> {
    let stored: StoredTable = serde_json::from_slice(bytes)?;

    let decode_row = |stored: StoredRow| -> StorageResult<Row> {
        let subtable = match stored.idsubdatatable {
            Some(child) if child > id => match subtables.get(&child) {
                Some(blob) => Some(Box::new(decode_table(blob, child, subtables)?)),
                None => None,
            },
            _ => None,
        };
        Ok(Row {
            columns: stored.columns,
            metadata: stored.metadata,
            subtable,
            comparisons: None,
        })
    };

    let mut table = ReportTable::new();
    for row in stored.rows {
        table.rows.push(decode_row(row)?);
    }
    table.summary_row = stored.summary_row.map(&decode_row).transpose()?;
    table.totals_row = stored.totals_row.map(&decode_row).transpose()?;
    table.metadata = stored.metadata;
    Ok(table)
}

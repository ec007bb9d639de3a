//! Archive records and completion flags.

use std::collections::BTreeMap;
use std::fmt;

use crate::cache::short_hash;
use crate::value::Value;

use super::chunk::CHUNK_APPENDIX;
use super::error::{StorageError, StorageResult};

/// Plugin whose archive always carries the visit counts.
pub const VISITS_SUMMARY_PLUGIN: &str = "VisitsSummary";

/// Longest record name the archive tables accept, in bytes.
pub const MAX_RECORD_NAME_LEN: usize = 255;

/// Record names holding the visit counts of an archive.
pub const NB_VISITS: &str = "nb_visits";
pub const NB_VISITS_CONVERTED: &str = "nb_visits_converted";

/// Completion state of an archive, stored as the value of its done flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveStatus {
    Ok,
    /// Write in progress or failed.
    Error,
    /// Deprecated, still selectable.
    Temporary,
    /// Stale, must be recomputed.
    Invalidated,
}

impl ArchiveStatus {
    pub fn value(&self) -> i64 {
        match self {
            ArchiveStatus::Ok => 1,
            ArchiveStatus::Error => 2,
            ArchiveStatus::Temporary => 3,
            ArchiveStatus::Invalidated => 4,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(ArchiveStatus::Ok),
            2 => Some(ArchiveStatus::Error),
            3 => Some(ArchiveStatus::Temporary),
            4 => Some(ArchiveStatus::Invalidated),
            _ => None,
        }
    }

    /// Flag values a selector treats as "done".
    pub fn selectable(include_invalidated: bool) -> Vec<ArchiveStatus> {
        let mut statuses = vec![ArchiveStatus::Ok, ArchiveStatus::Temporary];
        if include_invalidated {
            statuses.push(ArchiveStatus::Invalidated);
        }
        statuses
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveStatus::Ok => "ok",
            ArchiveStatus::Error => "error",
            ArchiveStatus::Temporary => "temporary",
            ArchiveStatus::Invalidated => "invalidated",
        };
        f.write_str(name)
    }
}

/// Storage kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Numeric,
    Blob,
}

impl RecordKind {
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Numeric => "numeric",
            RecordKind::Blob => "blob",
        }
    }
}

/// Payload of [`ArchiveWriter::insert_blob_record`](super::ArchiveWriter::insert_blob_record).
#[derive(Debug, Clone, PartialEq)]
pub enum BlobRecord {
    /// One serialized table.
    Single(Vec<u8>),
    /// Serialized tables keyed by subtable id; id 0 is the root table.
    Tables(BTreeMap<i64, Vec<u8>>),
}

/// A record value queued for the next flush.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SpooledValue {
    Numeric(Value),
    Blob(Vec<u8>),
}

/// Reject names that cannot be stored or would be mistaken for chunks.
pub fn validate_record_name(name: &str) -> StorageResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_RECORD_NAME_LEN {
        "name is longer than 255 bytes"
    } else if name.contains(CHUNK_APPENDIX) {
        "name contains the chunk appendix"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidRecordName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Hash of a segment as embedded in done flag names; empty for no segment.
pub fn segment_hash(segment: &str) -> String {
    if segment.is_empty() {
        String::new()
    } else {
        short_hash(segment)
    }
}

/// Done flag of an archive holding every plugin.
pub fn all_plugins_done_flag(segment: &str) -> String {
    format!("done{}", segment_hash(segment))
}

/// Done flag of an archive holding one plugin's reports.
pub fn plugin_done_flag(segment: &str, plugin: &str) -> String {
    format!("{}_done{}", plugin, segment_hash(segment))
}

/// Every flag name whose archive contains `plugin`'s reports.
pub fn done_flags_for_plugin(segment: &str, plugin: &str) -> Vec<String> {
    vec![
        plugin_done_flag(segment, plugin),
        all_plugins_done_flag(segment),
    ]
}

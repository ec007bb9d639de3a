//! Archive storage: writing computed reports and selecting completed ones.
//!
//! An archive is the set of records computed for one site, period, segment
//! and plugin. Records live in monthly numeric and blob shards:
//!
//! ```text
//! archive_numeric_2024_01 (idarchive, name, idsite, date1, date2, period, ts_archived, value)
//!   5  VisitsSummary_done  1 2024-01-10 2024-01-10 1 ...  1     <- completion flag
//!   5  nb_visits           1 2024-01-10 2024-01-10 1 ...  42
//! archive_blob_2024_01
//!   5  Referrers_type              <zlib report table>      <- root table
//!   5  Referrers_type_chunk_0_99   <zlib chunk of subtables>
//! ```
//!
//! The completion flag is written as `error` when the id is allocated and
//! flipped to `ok` by [`ArchiveWriter::finalize_archive`]. Selectors only
//! read archives whose flag is done.

mod chunk;
mod compress;
mod error;
mod record;
mod report_blob;
mod selector;
mod store;
mod tables;
mod writer;

pub use chunk::{
    chunk_range, chunk_record_name, decode_chunk, encode_chunk, is_chunk_record,
    parse_chunk_name, split_into_chunks, ChunkTables, CHUNK_APPENDIX, TABLES_PER_CHUNK,
};
pub use compress::{compressor_for, Compressor, NoCompression, ZlibCompressor};
pub use error::{StorageError, StorageResult};
pub use record::{
    all_plugins_done_flag, done_flags_for_plugin, plugin_done_flag, segment_hash,
    validate_record_name, ArchiveStatus, BlobRecord, RecordKind, MAX_RECORD_NAME_LEN,
    NB_VISITS, NB_VISITS_CONVERTED, VISITS_SUMMARY_PLUGIN,
};
pub use report_blob::{decode_report, encode_report};
pub use selector::{
    ArchiveDataRow, ArchiveIds, ArchiveSelector, RecordData, SelectorOptions, SubtableSelection,
};
pub use store::ArchiveStore;
pub use tables::{ArchiveTableNaming, MonthlyTables};
pub use writer::{ArchiveWriter, MAX_SPOOL_SIZE};

use serde::{Deserialize, Serialize};

use crate::period::Period;

/// Key of one archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveParams {
    pub site_id: i64,
    pub period: Period,
    /// Segment definition; empty for all visits.
    pub segment: String,
    /// Plugin the archive is computed for. `None` archives every plugin.
    pub plugin: Option<String>,
}

impl ArchiveParams {
    pub fn new(site_id: i64, period: Period, segment: &str) -> Self {
        Self {
            site_id,
            period,
            segment: segment.to_string(),
            plugin: None,
        }
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn segment_hash(&self) -> String {
        segment_hash(&self.segment)
    }

    /// Name of the completion flag a writer for these params maintains.
    pub fn done_flag(&self) -> String {
        match &self.plugin {
            Some(plugin) => plugin_done_flag(&self.segment, plugin),
            None => all_plugins_done_flag(&self.segment),
        }
    }
}

/// A resolved archive and the visit counts recorded for its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveIdAndVisits {
    pub id_archive: i64,
    pub visits: i64,
    pub visits_converted: i64,
}

//! Explicit archive-id cache.
//!
//! Archive lookups are repeated many times while serving one request (every
//! report of a plugin resolves the same archive). Instead of process-wide
//! static arrays, callers own an [`ArchiveIdCache`] and pass it by
//! reference, which makes its lifetime and its invalidation explicit.
//!
//! # Key Format
//!
//! ```text
//! (idsite, period kind, date1, date2, segment hash, plugin) -> Option<ArchiveIdAndVisits>
//! ```
//!
//! A cached `None` means "no completed archive", which is a valid answer and
//! avoids hitting storage again until the entry is invalidated.

mod hash;
pub use hash::{compute_hash, hash_str, short_hash, SHORT_HASH_LEN};

use std::collections::HashMap;

use crate::archive::{ArchiveIdAndVisits, ArchiveParams};
use crate::period::Period;

/// Key of one cached archive lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub site_id: i64,
    pub period: Period,
    pub segment_hash: String,
    pub plugin: Option<String>,
}

impl CacheKey {
    pub fn for_params(params: &ArchiveParams) -> Self {
        Self {
            site_id: params.site_id,
            period: params.period,
            segment_hash: params.segment_hash(),
            plugin: params.plugin.clone(),
        }
    }
}

/// Per-request (or per-process) cache of resolved archive ids.
#[derive(Debug, Default)]
pub struct ArchiveIdCache {
    entries: HashMap<CacheKey, Option<ArchiveIdAndVisits>>,
    hits: u64,
    misses: u64,
}

impl ArchiveIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached result. The outer `Option` is a cache miss.
    pub fn get(&mut self, params: &ArchiveParams) -> Option<Option<ArchiveIdAndVisits>> {
        let found = self.entries.get(&CacheKey::for_params(params)).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, params: &ArchiveParams, value: Option<ArchiveIdAndVisits>) {
        self.entries.insert(CacheKey::for_params(params), value);
    }

    /// Drop one cached lookup. Returns true if an entry was removed.
    pub fn invalidate(&mut self, params: &ArchiveParams) -> bool {
        self.entries.remove(&CacheKey::for_params(params)).is_some()
    }

    /// Drop every cached lookup of a site, e.g. after its archives were invalidated.
    pub fn invalidate_site(&mut self, site_id: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.site_id != site_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries in the cache.
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
}

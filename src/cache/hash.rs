//! Content hashing used to derive deterministic names.
//!
//! Segment hashes end up in completion flag names and temporary table
//! names, so the output must be stable across processes and releases.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of the truncated hex digests used inside identifiers.
pub const SHORT_HASH_LEN: usize = 32;

/// SHA256 of the JSON form of `value`, as 64 lowercase hex characters.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(hash_str(&json))
}

/// SHA256 of a string as lowercase hex.
pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First [`SHORT_HASH_LEN`] hex characters of [`hash_str`].
pub fn short_hash(s: &str) -> String {
    let mut full = hash_str(s);
    full.truncate(SHORT_HASH_LEN);
    full
}

//! Blob compression strategies.
//!
//! Selected once from the storage settings and handed to the writer and
//! the selector, so both sides of a database agree on the encoding.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::config::StorageSettings;

use super::error::StorageResult;

/// Encodes blob payloads before storage and decodes them after reads.
pub trait Compressor: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, data: &[u8]) -> StorageResult<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> StorageResult<Vec<u8>>;
}

/// zlib (RFC 1950) compression.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn encode(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Stores payloads as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encode(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// zlib when the storage keeps binary blobs, raw bytes otherwise.
pub fn compressor_for(settings: &StorageSettings) -> Box<dyn Compressor> {
    if settings.blob_compression {
        Box::new(ZlibCompressor::default())
    } else {
        Box::new(NoCompression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_roundtrip() {
        let compressor = ZlibCompressor::default();
        let data = b"label,nb_visits\n".repeat(50);
        let encoded = compressor.encode(&data).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(compressor.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_zlib_rejects_garbage() {
        assert!(ZlibCompressor::default().decode(b"not zlib").is_err());
    }

    #[test]
    fn test_compressor_for_settings() {
        let mut settings = StorageSettings::default();
        assert_eq!(compressor_for(&settings).name(), "zlib");
        settings.blob_compression = false;
        assert_eq!(compressor_for(&settings).name(), "none");
    }
}

//! Gzip companions for compressible assets

use std::io::Write as _;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::checksum::Checksum;
use crate::classify::is_compressible;

/// Fixed gzip level, balances CPU and ratio and keeps output reproducible
pub const COMPRESSION_LEVEL: u32 = 6;

/// Artifacts at or below this size are never compressed
pub const COMPRESS_MIN_SIZE: usize = 1024;

/// Gzip compress data.
///
/// The gzip header carries no timestamp, so equal input gives equal output.
///
/// # Errors
/// Returns an error if the encoder fails to write.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Check if an artifact should get a gzip companion.
#[must_use]
pub fn should_compress(data: &[u8], content_type: &str) -> bool {
    is_compressible(content_type) && data.len() > COMPRESS_MIN_SIZE
}

/// Gzip-compressed form of an artifact
#[derive(Debug, Clone)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    /// Checksum of the compressed bytes, for transfer integrity only
    pub checksum: Checksum,
}

impl Compressed {
    /// Compress an artifact if its type and size qualify.
    ///
    /// # Errors
    /// Returns an error if compression fails.
    pub fn for_artifact(data: &[u8], content_type: &str) -> std::io::Result<Option<Self>> {
        if !should_compress(data, content_type) {
            return Ok(None);
        }
        let bytes = compress(data)?;
        let checksum = Checksum::from_bytes(&bytes);
        Ok(Some(Self { bytes, checksum }))
    }
}

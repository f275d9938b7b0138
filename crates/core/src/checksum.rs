//! Content checksums for change detection and transfer integrity (MD5)
//!
//! MD5 is used because object stores speak it natively (`Content-MD5`,
//! `ETag`), not as a security boundary.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};

/// A 128-bit MD5 digest, rendered as hex or base64 on demand
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Md5::digest(data).into())
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to hex string (the form `ETag` headers use)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Convert to base64 string (the form `Content-MD5` and stored metadata use)
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = b"hello world";
        let c1 = Checksum::from_bytes(data);
        let c2 = Checksum::from_bytes(data);
        assert_eq!(c1, c2);
        assert_eq!(c1.to_hex(), c2.to_hex());
        assert_eq!(c1.to_base64(), c2.to_base64());
    }

    #[test]
    fn test_checksum_different_data() {
        let c1 = Checksum::from_bytes(b"hello");
        let c2 = Checksum::from_bytes(b"world");
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_checksum_known_vectors() {
        let empty = Checksum::from_bytes(b"");
        assert_eq!(empty.to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(empty.to_base64(), "1B2M2Y8AsgTpgAmY7PhCfg==");

        let fox = Checksum::from_bytes(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(fox.to_hex(), "9e107d9d372bb6826bd81d3542a419d6");
    }
}

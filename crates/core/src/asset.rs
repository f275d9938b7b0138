//! Assets as they move through one sync pass

use std::path::PathBuf;

use crate::classify::classify;

/// Join remote path parts with `/`.
///
/// Empty parts and stray slashes are dropped, so the result never starts with
/// a slash and never contains `//`.
#[must_use]
pub fn join_remote_path<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for part in parts {
        for segment in part.as_ref().split('/').filter(|s| !s.is_empty()) {
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(segment);
        }
    }
    joined
}

/// A logical unit to sync, materialized for a single pass
#[derive(Debug, Clone)]
pub struct Asset {
    /// Source file, absent for joined bundles
    pub local_path: Option<PathBuf>,
    /// Slash separated path below the storage root
    pub remote_path: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    /// Read an asset from disk, classifying it by its remote path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn read(local_path: impl Into<PathBuf>, remote_path: &str) -> std::io::Result<Self> {
        let local_path = local_path.into();
        let bytes = std::fs::read(&local_path)?;
        Ok(Self {
            content_type: classify(remote_path),
            remote_path: join_remote_path([remote_path]),
            local_path: Some(local_path),
            bytes,
        })
    }

    /// Build an asset from in-memory content (bundles, single uploads)
    #[must_use]
    pub fn from_bytes(remote_path: &str, bytes: Vec<u8>) -> Self {
        Self {
            local_path: None,
            content_type: classify(remote_path),
            remote_path: join_remote_path([remote_path]),
            bytes,
        }
    }
}

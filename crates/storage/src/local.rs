//! Local directory backend
//!
//! Mirrors uploads into a directory on disk, e.g. one served by a web server
//! or mounted from a CDN origin. Headers and checksums that an object store
//! would keep as metadata go to JSON sidecars under `.assetsync/meta/`.

use std::path::{Component, Path, PathBuf};

use assetsync_core::config::{ConfigError, Settings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CachePolicy, RemoteObject, Storage, StorageError};

const BACKEND: &str = "local";

/// Sidecar directory, relative to the storage root
const META_DIR: &str = ".assetsync/meta";

/// Metadata sidecar stored next to every object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    pub cache_control: String,
    pub expires: String,
    /// base64 MD5 of the uncompressed asset
    pub checksum: String,
}

/// Directory mirror backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    base_url: Option<String>,
    policy: CachePolicy,
}

impl LocalStorage {
    /// Create a backend writing under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
            policy: CachePolicy::default(),
        }
    }

    /// # Errors
    /// Returns an error if `local.path` is not set.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let root = settings
            .local
            .path
            .clone()
            .ok_or(ConfigError::MissingSetting("local.path"))?;
        Ok(Self {
            root,
            base_url: settings.local.base_url.clone(),
            policy: CachePolicy::from_settings(settings),
        })
    }

    /// Public URL the directory is served under
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the sidecar of a stored object
    ///
    /// # Errors
    /// Returns an error if the sidecar exists but cannot be read or parsed.
    pub fn meta(&self, remote_path: &str) -> Result<Option<ObjectMeta>, StorageError> {
        let path = self.meta_path(remote_path)?;
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = serde_json::from_slice(&content).map_err(|e| StorageError::backend(BACKEND, e))?;
        Ok(Some(meta))
    }

    /// Object path on disk; rejects paths that would escape the root
    fn object_path(&self, remote_path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(remote_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if remote_path.is_empty() || escapes {
            return Err(StorageError::InvalidPath(remote_path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn meta_path(&self, remote_path: &str) -> Result<PathBuf, StorageError> {
        self.object_path(remote_path)?;
        Ok(self.root.join(META_DIR).join(format!("{remote_path}.json")))
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    // Create parent directories
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn open(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(self.root.join(META_DIR))?;
        debug!("writing assets under {}", self.root.display());
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Nothing to release for a directory
        Ok(())
    }

    fn remote_base_url(&self, secure: bool) -> Result<String, StorageError> {
        match &self.base_url {
            Some(url) => {
                let url = url.trim_end_matches('/');
                if secure {
                    if let Some(rest) = url.strip_prefix("http://") {
                        return Ok(format!("https://{rest}"));
                    }
                }
                Ok(url.to_string())
            }
            None if secure => Err(StorageError::Unsupported {
                what: "secure URLs without a base_url",
                backend: BACKEND,
            }),
            None => Ok(format!("file://{}", self.root.display())),
        }
    }

    async fn stored_checksum(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        if !self.object_path(remote_path)?.exists() {
            return Ok(None);
        }
        Ok(self.meta(remote_path)?.map(|meta| meta.checksum))
    }

    async fn write(&self, object: RemoteObject) -> Result<(), StorageError> {
        let path = self.object_path(&object.path)?;
        let meta = ObjectMeta {
            content_type: object.content_type.clone(),
            content_encoding: object.content_encoding.map(str::to_string),
            content_disposition: object.content_disposition.clone(),
            cache_control: object.cache_control.clone(),
            expires: object.expires_header(),
            checksum: object.source_checksum.to_base64(),
        };
        let meta_json =
            serde_json::to_vec_pretty(&meta).map_err(|e| StorageError::backend(BACKEND, e))?;

        write_file(&path, &object.body)?;
        write_file(&self.meta_path(&object.path)?, &meta_json)?;
        debug!("wrote {} ({} bytes)", path.display(), object.body.len());
        Ok(())
    }

    fn cache_policy(&self) -> CachePolicy {
        self.policy
    }
}

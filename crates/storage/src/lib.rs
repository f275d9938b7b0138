//! assetsync-storage: object storage backends
//!
//! Every backend implements [`Storage`]. The provided [`Storage::put`] owns the
//! upload protocol: checksum comparison, cache headers and the gzip companion.

pub mod cloudfiles;
pub mod local;
pub mod memory;
pub mod s3;

use std::error::Error as StdError;
use std::sync::Arc;

use assetsync_core::compress::Compressed;
use assetsync_core::config::{ConfigError, Settings};
use assetsync_core::Checksum;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

pub use cloudfiles::CloudFilesStorage;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Custom metadata key holding the base64 MD5 of the uncompressed asset
pub const CHECKSUM_METADATA_KEY: &str = "assetsync-checksum";

/// `Expires` header format
pub const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Suffix of gzip companion objects
pub const GZIP_SUFFIX: &str = ".gz";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend cannot do this, callers may fall back
    #[error("{what} is not supported by the {backend} backend")]
    Unsupported {
        what: &'static str,
        backend: &'static str,
    },

    #[error("storage session is not open")]
    NotOpen,

    #[error("invalid remote path `{0}`")]
    InvalidPath(String),

    #[error("{backend} request failed: {message}")]
    Request {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} error")]
    Backend {
        backend: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn request(backend: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Request {
            backend,
            message: message.to_string(),
        }
    }

    pub fn backend(
        backend: &'static str,
        err: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self::Backend {
            backend,
            source: err.into(),
        }
    }
}

/// Cache window applied to every uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    expiration_secs: u64,
}

impl CachePolicy {
    #[must_use]
    pub fn from_secs(expiration_secs: u64) -> Self {
        Self { expiration_secs }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_secs(settings.expiration_secs())
    }

    #[must_use]
    pub fn expiration_secs(&self) -> u64 {
        self.expiration_secs
    }

    /// `Cache-Control` header value
    #[must_use]
    pub fn cache_control(&self) -> String {
        format!("max-age={}", self.expiration_secs)
    }

    /// Absolute expiry for an object written at `now`
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.expiration_secs).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(secs)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_secs(u64::from(assetsync_core::config::DEFAULT_EXPIRATION_DAYS) * 86_400)
    }
}

/// One object as it is written to a backend
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub path: String,
    pub body: Bytes,
    pub content_type: String,
    pub content_encoding: Option<&'static str>,
    pub content_disposition: Option<String>,
    pub cache_control: String,
    pub expires: DateTime<Utc>,
    /// Checksum of the uncompressed asset, stored as custom metadata
    pub source_checksum: Checksum,
    /// Checksum of `body`, sent for transfer integrity
    pub integrity: Checksum,
}

impl RemoteObject {
    /// `Expires` header value
    #[must_use]
    pub fn expires_header(&self) -> String {
        self.expires.format(EXPIRES_FORMAT).to_string()
    }
}

/// File name part of a remote path
fn basename(remote_path: &str) -> &str {
    remote_path.rsplit('/').next().unwrap_or(remote_path)
}

/// Storage backend
///
/// Methods take `&self` so one handle can serve concurrent uploads.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend identifier, as used in the config file
    fn name(&self) -> &'static str;

    /// Acquire a session (authenticate, connect, check the bucket)
    async fn open(&self) -> Result<(), StorageError>;

    /// Release the session
    async fn close(&self) -> Result<(), StorageError>;

    /// Public base URL of stored assets, without a trailing slash
    fn remote_base_url(&self, secure: bool) -> Result<String, StorageError>;

    /// Checksum recorded for a remote object, if it exists
    async fn stored_checksum(&self, remote_path: &str) -> Result<Option<String>, StorageError>;

    /// Unconditionally write one object
    async fn write(&self, object: RemoteObject) -> Result<(), StorageError>;

    /// Cache window for written objects
    fn cache_policy(&self) -> CachePolicy;

    /// Upload an asset unless the stored copy is identical.
    ///
    /// Compressible assets over the size threshold also get a gzip companion
    /// at `remote_path` + `.gz`, written before the plain object. Returns
    /// whether anything was written.
    ///
    /// # Errors
    /// Returns an error if the checksum lookup, compression or a write fails.
    async fn put(
        &self,
        data: Bytes,
        content_type: &str,
        remote_path: &str,
        force: bool,
    ) -> Result<bool, StorageError> {
        let checksum = Checksum::from_bytes(&data);

        if !force {
            let stored = self.stored_checksum(remote_path).await?;
            if stored.as_deref() == Some(checksum.to_base64().as_str()) {
                debug!("{remote_path} unchanged ({checksum})");
                return Ok(false);
            }
        }

        let compressed = Compressed::for_artifact(&data, content_type)?;

        let policy = self.cache_policy();
        let expires = policy.expires_at(Utc::now());
        let cache_control = policy.cache_control();

        // The plain object carries the staleness checksum, so it is written
        // last: a failed companion write leaves the old checksum in place.
        if let Some(Compressed { bytes, checksum: gz_checksum }) = compressed {
            debug!("{remote_path} gets a gzip companion ({} bytes)", bytes.len());
            self.write(RemoteObject {
                path: format!("{remote_path}{GZIP_SUFFIX}"),
                body: Bytes::from(bytes),
                content_type: content_type.to_string(),
                content_encoding: Some("gzip"),
                content_disposition: Some(format!(
                    "inline; filename=\"{}\"",
                    basename(remote_path)
                )),
                cache_control: cache_control.clone(),
                expires,
                source_checksum: checksum,
                integrity: gz_checksum,
            })
            .await?;
        }

        self.write(RemoteObject {
            path: remote_path.to_string(),
            body: data,
            content_type: content_type.to_string(),
            content_encoding: None,
            content_disposition: None,
            cache_control,
            expires,
            source_checksum: checksum,
            integrity: checksum,
        })
        .await?;

        Ok(true)
    }
}

/// Build the backend selected by `settings.backend`.
///
/// Only validates settings; no I/O happens until [`Storage::open`].
///
/// # Errors
/// Returns an error if the backend is missing, unknown, or misconfigured.
pub fn client(settings: &Settings) -> Result<Arc<dyn Storage>, ConfigError> {
    settings.validate()?;
    let backend = settings.backend.trim();
    let storage: Arc<dyn Storage> = match backend {
        "s3" => Arc::new(S3Storage::from_settings(settings)?),
        "cloudfiles" => Arc::new(CloudFilesStorage::from_settings(settings)?),
        "local" => Arc::new(LocalStorage::from_settings(settings)?),
        "dummy" => Arc::new(MemoryStorage::from_settings(settings)),
        other => return Err(ConfigError::UnknownBackend(other.to_string())),
    };
    debug!("using {} storage backend", storage.name());
    Ok(storage)
}

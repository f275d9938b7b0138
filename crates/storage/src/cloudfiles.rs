//! Rackspace Cloud Files backend (Swift v1 REST API)

use std::sync::RwLock;

use assetsync_core::config::{ConfigError, Settings};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_TYPE, ETAG, EXPIRES, HeaderMap};
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, info};

use crate::{CachePolicy, RemoteObject, Storage, StorageError};

const BACKEND: &str = "cloudfiles";

/// Rackspace v1.0 authentication endpoint
pub const DEFAULT_AUTH_URL: &str = "https://auth.api.rackspacecloud.com/v1.0";

/// Object metadata header holding the checksum
const CHECKSUM_HEADER: &str = "x-object-meta-assetsync-checksum";

/// Authenticated session state
#[derive(Debug, Clone)]
struct Session {
    token: String,
    storage_url: Url,
    cdn_uri: Option<String>,
}

/// Container-style backend
#[derive(Debug)]
pub struct CloudFilesStorage {
    container: String,
    username: String,
    api_key: String,
    auth_url: String,
    policy: CachePolicy,
    http: Client,
    session: RwLock<Option<Session>>,
}

impl CloudFilesStorage {
    /// # Errors
    /// Returns an error if the container or credentials are missing.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let cf = &settings.cloudfiles;
        let container = cf
            .container
            .clone()
            .ok_or(ConfigError::MissingSetting("cloudfiles.container"))?;
        let username = cf
            .username
            .clone()
            .ok_or(ConfigError::MissingSetting("cloudfiles.username"))?;
        let api_key = cf
            .api_key
            .clone()
            .ok_or(ConfigError::MissingSetting("cloudfiles.api_key"))?;

        Ok(Self {
            container,
            username,
            api_key,
            auth_url: cf
                .auth_url
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            policy: CachePolicy::from_settings(settings),
            http: Client::new(),
            session: RwLock::new(None),
        })
    }

    fn session(&self) -> Result<Session, StorageError> {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::NotOpen)
    }

    /// `<base>/<container>[/<remote path segments>]`
    fn container_url(&self, base: &Url, remote_path: Option<&str>) -> Result<Url, StorageError> {
        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StorageError::request(BACKEND, format!("{base} cannot be a base URL")))?;
            segments.pop_if_empty().push(&self.container);
            if let Some(path) = remote_path {
                segments.extend(path.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    async fn authenticate(&self) -> Result<(String, Url, Option<Url>), StorageError> {
        let response = self
            .http
            .get(&self.auth_url)
            .header("X-Auth-User", &self.username)
            .header("X-Auth-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        let response = check_status(response, "authentication")?;

        let headers = response.headers();
        let token = header_str(headers, "x-auth-token")
            .ok_or_else(|| StorageError::request(BACKEND, "no X-Auth-Token in auth response"))?;
        let storage_url = header_url(headers, "x-storage-url")?
            .ok_or_else(|| StorageError::request(BACKEND, "no X-Storage-Url in auth response"))?;
        let cdn_url = header_url(headers, "x-cdn-management-url")?;
        Ok((token, storage_url, cdn_url))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn header_url(headers: &HeaderMap, name: &str) -> Result<Option<Url>, StorageError> {
    header_str(headers, name)
        .map(|raw| Url::parse(&raw).map_err(|e| StorageError::backend(BACKEND, e)))
        .transpose()
}

fn check_status(response: Response, action: &str) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StorageError::request(BACKEND, format!("{action} returned {status}")))
    }
}

#[async_trait]
impl Storage for CloudFilesStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn open(&self) -> Result<(), StorageError> {
        let (token, storage_url, cdn_url) = self.authenticate().await?;

        let container_url = self.container_url(&storage_url, None)?;
        let response = self
            .http
            .put(container_url)
            .header("X-Auth-Token", &token)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        check_status(response, "container creation")?;

        let mut cdn_uri = None;
        if let Some(cdn_url) = cdn_url {
            let response = self
                .http
                .put(self.container_url(&cdn_url, None)?)
                .header("X-Auth-Token", &token)
                .header("X-CDN-Enabled", "True")
                .send()
                .await
                .map_err(|e| StorageError::backend(BACKEND, e))?;
            let response = check_status(response, "CDN enabling")?;
            cdn_uri = header_str(response.headers(), "x-cdn-uri");
        }

        info!("connected to container {}", self.container);
        *self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Session {
            token,
            storage_url,
            cdn_uri,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn remote_base_url(&self, secure: bool) -> Result<String, StorageError> {
        if secure {
            return Err(StorageError::Unsupported {
                what: "secure URLs",
                backend: BACKEND,
            });
        }
        self.session()?
            .cdn_uri
            .map(|uri| uri.trim_end_matches('/').to_string())
            .ok_or_else(|| StorageError::request(BACKEND, "container is not CDN-enabled"))
    }

    async fn stored_checksum(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        let session = self.session()?;
        let url = self.container_url(&session.storage_url, Some(remote_path))?;
        let response = self
            .http
            .head(url)
            .header("X-Auth-Token", &session.token)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("{remote_path} not in container yet");
            return Ok(None);
        }
        let response = check_status(response, "object lookup")?;
        Ok(header_str(response.headers(), CHECKSUM_HEADER))
    }

    async fn write(&self, object: RemoteObject) -> Result<(), StorageError> {
        let session = self.session()?;
        let url = self.container_url(&session.storage_url, Some(&object.path))?;

        let mut request = self
            .http
            .put(url)
            .header("X-Auth-Token", &session.token)
            .header(CONTENT_TYPE, &object.content_type)
            .header(ETAG, object.integrity.to_hex())
            .header(CACHE_CONTROL, &object.cache_control)
            .header(EXPIRES, object.expires_header())
            .header(CHECKSUM_HEADER, object.source_checksum.to_base64());
        if let Some(encoding) = object.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some(disposition) = &object.content_disposition {
            request = request.header(CONTENT_DISPOSITION, disposition);
        }

        let response = request
            .body(object.body)
            .send()
            .await
            .map_err(|e| StorageError::backend(BACKEND, e))?;
        check_status(response, "object upload")?;
        Ok(())
    }

    fn cache_policy(&self) -> CachePolicy {
        self.policy
    }
}

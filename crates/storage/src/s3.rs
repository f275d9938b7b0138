//! Amazon S3 (and S3-compatible) backend

use std::sync::RwLock;

use assetsync_core::config::{ConfigError, Settings};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as AwsDateTime};
use aws_sdk_s3::types::ObjectCannedAcl;
use tracing::{debug, info};

use crate::{CHECKSUM_METADATA_KEY, CachePolicy, RemoteObject, Storage, StorageError};

const BACKEND: &str = "s3";

/// Default public host for bucket URLs
const S3_HOST: &str = "s3.amazonaws.com";

/// Bucket-style backend using the AWS SDK
#[derive(Debug)]
pub struct S3Storage {
    bucket: String,
    prefix: String,
    bucket_cname: bool,
    credentials: Option<(String, String)>,
    region: Option<String>,
    endpoint: Option<String>,
    policy: CachePolicy,
    client: RwLock<Option<Client>>,
}

impl S3Storage {
    /// # Errors
    /// Returns an error if the bucket is missing, or only one of key and secret is set.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let s3 = &settings.s3;
        let bucket = s3
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or(ConfigError::MissingSetting("s3.bucket"))?;

        let credentials = match (&s3.key, &s3.secret) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteCredentials("s3.key", "s3.secret")),
        };

        Ok(Self {
            bucket,
            prefix: s3.prefix.trim_matches('/').to_string(),
            bucket_cname: s3.bucket_cname,
            credentials,
            region: s3.region.clone(),
            endpoint: s3.endpoint.clone(),
            policy: CachePolicy::from_settings(settings),
            client: RwLock::new(None),
        })
    }

    /// Object key for a remote path
    fn key(&self, remote_path: &str) -> String {
        if self.prefix.is_empty() {
            remote_path.to_string()
        } else {
            format!("{}/{remote_path}", self.prefix)
        }
    }

    fn client(&self) -> Result<Client, StorageError> {
        self.client
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::NotOpen)
    }

    async fn build_client(&self) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }

        // Explicit credentials win over the default chain
        if let Some((key, secret)) = &self.credentials {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "assetsync",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn open(&self) -> Result<(), StorageError> {
        let client = self.build_client().await;
        client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::request(BACKEND, DisplayErrorContext(&e)))?;

        info!("connected to bucket {}", self.bucket);
        *self
            .client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(client);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.client
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn remote_base_url(&self, secure: bool) -> Result<String, StorageError> {
        let scheme = if secure { "https" } else { "http" };
        let mut url = match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None if self.bucket_cname => format!("{scheme}://{}", self.bucket),
            None => format!("{scheme}://{S3_HOST}/{}", self.bucket),
        };
        if !self.prefix.is_empty() {
            url.push('/');
            url.push_str(&self.prefix);
        }
        Ok(url)
    }

    async fn stored_checksum(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        let client = self.client()?;
        let result = client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(remote_path))
            .send()
            .await;

        match result {
            Ok(head) => Ok(head
                .metadata()
                .and_then(|meta| meta.get(CHECKSUM_METADATA_KEY))
                .cloned()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                debug!("{remote_path} not in bucket yet");
                Ok(None)
            }
            Err(e) => Err(StorageError::request(BACKEND, DisplayErrorContext(&e))),
        }
    }

    async fn write(&self, object: RemoteObject) -> Result<(), StorageError> {
        let client = self.client()?;

        let mut request = client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(&object.path))
            .content_type(&object.content_type)
            .cache_control(&object.cache_control)
            .expires(AwsDateTime::from_secs(object.expires.timestamp()))
            .acl(ObjectCannedAcl::PublicRead)
            .content_md5(object.integrity.to_base64())
            .metadata(CHECKSUM_METADATA_KEY, object.source_checksum.to_base64());

        if let Some(encoding) = object.content_encoding {
            request = request.content_encoding(encoding);
        }
        if let Some(disposition) = &object.content_disposition {
            request = request.content_disposition(disposition);
        }

        request
            .body(ByteStream::from(object.body))
            .send()
            .await
            .map_err(|e| StorageError::request(BACKEND, DisplayErrorContext(&e)))?;
        Ok(())
    }

    fn cache_policy(&self) -> CachePolicy {
        self.policy
    }
}

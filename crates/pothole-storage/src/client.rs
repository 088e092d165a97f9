//! S3-compatible object store client.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::uploader::ObjectStore;

pub const DEFAULT_ENDPOINT_URL: &str = "https://fly.storage.tigris.dev/";
pub const DEFAULT_BUCKET_NAME: &str = "pothole-images";
pub const DEFAULT_REGION: &str = "auto";

/// Configuration for the object store client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region ("auto" for most S3-compatible providers)
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    ///
    /// Endpoint, bucket and region fall back to defaults; credentials are
    /// required.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_URL")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT_URL.to_string()),
            access_key_id: non_empty_var("S3_ACCESS_KEY")?,
            secret_access_key: non_empty_var("S3_SECRET_KEY")?,
            bucket_name: std::env::var("TIGRIS_BUCKET_NAME")
                .unwrap_or_else(|_| DEFAULT_BUCKET_NAME.to_string()),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
        })
    }
}

fn non_empty_var(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
}

/// Object store client for any S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "pothole-uploader",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a local file.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}/{}", path.display(), self.bucket, key);
        Ok(())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("Bucket connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        self.upload_file(path, key, content_type).await
    }
}

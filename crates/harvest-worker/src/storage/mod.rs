use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod config;

pub use config::StorageConfig;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object storage rejected '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("Upload of {} timed out after {after:?}", .path.display())]
    TimedOut { path: PathBuf, after: Duration },

    #[error("Upload cancelled by shutdown")]
    Cancelled,
}

/// Moves a local file to durable remote storage
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `local` under `prefix` and return its remote location.
    ///
    /// Must not delete `local`, whatever the outcome.
    async fn upload(&self, local: &Path, prefix: &str) -> Result<String, UploadError>;
}

#[derive(Clone)]
pub struct S3Uploader {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3Uploader {
    pub async fn new(config: StorageConfig) -> Self {
        debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "Initializing S3 uploader"
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "harvest-storage");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client,
            bucket: config.bucket,
            endpoint: config.endpoint,
        }
    }

    /// Public location of an object, as recorded in logs
    pub fn object_url(&self, key: &str) -> String {
        object_url(&self.bucket, self.endpoint.as_deref(), key)
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn upload(&self, local: &Path, prefix: &str) -> Result<String, UploadError> {
        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::Io {
                path: local.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path has no UTF-8 file name",
                ),
            })?;
        let key = object_key(prefix, file_name);

        let size = tokio::fs::metadata(local)
            .await
            .map_err(|source| UploadError::Io {
                path: local.to_path_buf(),
                source,
            })?
            .len();

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| UploadError::Storage {
                key: key.clone(),
                message: e.to_string(),
            })?;

        debug!(key = %key, size, "Uploading to s3://{}/{}", self.bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body);

        if let Some(content_type) = content_type_for(file_name) {
            request = request.content_type(content_type);
        }

        request.send().await.map_err(|e| UploadError::Storage {
            key: key.clone(),
            message: DisplayErrorContext(&e).to_string(),
        })?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(self.object_url(&key))
    }
}

/// `<prefix>/<file_name>`, tolerating stray slashes in `prefix`
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

pub fn object_url(bucket: &str, endpoint: Option<&str>, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
    }
}

fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?;
    match extension {
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "json" => Some("application/json"),
        _ => None,
    }
}

// S3-compatible object storage transfer backend (Supabase Storage, MinIO)

use super::TransferClient;
use crate::config::ObjectStorageConfig;
use crate::errors::{ConfigurationError, TransferError};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Bound on the endpoint liveness check
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Uploads files as objects named after the file, one bucket per destination.
///
/// Every upload is a plain PUT, so re-running a transfer overwrites the
/// previous objects.
pub struct ObjectStorageTransfer {
    endpoint: String,
    region: String,
    credentials: Credentials,
    http: reqwest::Client,
}

impl ObjectStorageTransfer {
    #[instrument(skip(access_key, secret_key), fields(endpoint = %endpoint))]
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, ConfigurationError> {
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| {
                error!(error = %e, "Failed to create object storage credentials");
                ConfigurationError::Invalid(format!("Invalid object storage credentials: {}", e))
            })?;

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                ConfigurationError::Invalid(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: region.to_string(),
            credentials,
            http,
        })
    }

    pub fn from_config(config: &ObjectStorageConfig) -> Result<Self, ConfigurationError> {
        match (config.access_key.as_deref(), config.secret_key.as_deref()) {
            (Some(access_key), Some(secret_key)) => {
                Self::new(&config.endpoint, &config.region, access_key, secret_key)
            }
            _ => Err(ConfigurationError::MissingCredentials(
                "object storage".to_string(),
            )),
        }
    }

    /// Object keys stored in `bucket`, sorted
    #[instrument(skip(self))]
    pub async fn list_files(&self, bucket: &str) -> Result<Vec<String>, TransferError> {
        let pages = self
            .bucket(bucket)?
            .list(String::new(), None)
            .await
            .map_err(|e| {
                TransferError::ConnectionFailed(format!("Failed to list bucket {}: {}", bucket, e))
            })?;

        let mut keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.key)
            .collect();
        keys.sort();
        debug!(count = keys.len(), "Listed bucket");
        Ok(keys)
    }

    /// Remove one object; deleting a missing key is not an error
    #[instrument(skip(self))]
    pub async fn delete_file(&self, bucket: &str, key: &str) -> Result<(), TransferError> {
        let response = self.bucket(bucket)?.delete_object(key).await.map_err(|e| {
            TransferError::UploadFailed(format!(
                "Failed to delete '{}' from bucket {}: {}",
                key, bucket, e
            ))
        })?;

        match response.status_code() {
            200..=299 | 404 => {
                info!("Object deleted");
                Ok(())
            }
            status => {
                warn!(status = status, "Object storage refused delete");
                Err(TransferError::UploadFailed(format!(
                    "Object storage refused to delete '{}' with status {}",
                    key, status
                )))
            }
        }
    }

    fn bucket(&self, name: &str) -> Result<Bucket, TransferError> {
        let region = Region::Custom {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
        };
        let bucket = Bucket::new(name, region, self.credentials.clone())
            .map_err(|e| {
                TransferError::ConnectionFailed(format!("Failed to open bucket {}: {}", name, e))
            })?
            .with_path_style();
        Ok(bucket)
    }
}

#[async_trait]
impl TransferClient for ObjectStorageTransfer {
    fn backend(&self) -> &'static str {
        "object_storage"
    }

    /// Any HTTP answer from the endpoint counts as reachable; only transport
    /// errors fail the check
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn connect(&mut self) -> bool {
        if self.endpoint.is_empty() {
            error!("Object storage endpoint is empty");
            return false;
        }
        match self.http.head(&self.endpoint).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Object storage endpoint reachable");
                true
            }
            Err(e) => {
                error!(error = %e, "Object storage endpoint unreachable");
                false
            }
        }
    }

    async fn ensure_destination(&mut self, _remote_path: &str) -> bool {
        true
    }

    fn resolve_destination(&self, destination_name: &str) -> String {
        destination_name.to_string()
    }

    #[instrument(skip(self, local_path), fields(bucket = %remote_path, key = %file_name))]
    async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        file_name: &str,
    ) -> Result<(), TransferError> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            TransferError::UploadFailed(format!("Failed to read {}: {}", local_path.display(), e))
        })?;

        let bucket = self.bucket(remote_path)?;
        let response = bucket
            .put_object_with_content_type(file_name, &data, "application/octet-stream")
            .await
            .map_err(|e| {
                TransferError::UploadFailed(format!(
                    "Failed to put object '{}' into bucket {}: {}",
                    file_name, remote_path, e
                ))
            })?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(TransferError::UploadFailed(format!(
                "Object storage rejected '{}' with status {}",
                file_name, status
            )));
        }

        debug!(size = data.len(), "Object stored");
        Ok(())
    }

    async fn remote_file_size(&mut self, remote_path: &str, file_name: &str) -> Option<u64> {
        let bucket = self.bucket(remote_path).ok()?;
        match bucket.head_object(file_name).await {
            Ok((head, 200)) => head.content_length.and_then(|len| u64::try_from(len).ok()),
            Ok((_, status)) => {
                debug!(status = status, key = %file_name, "HEAD did not return object metadata");
                None
            }
            Err(e) => {
                debug!(error = %e, key = %file_name, "HEAD request failed");
                None
            }
        }
    }

    async fn disconnect(&mut self) {
        info!(endpoint = %self.endpoint, "Object storage transfer finished");
    }
}

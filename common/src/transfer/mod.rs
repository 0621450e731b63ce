// Transfer layer: deliver extracted files to remote destinations

pub mod object_storage;
pub mod sftp;
pub mod webhook;

use crate::config::{ObjectStorageConfig, SftpConfig, WebhookConfig};
use crate::errors::{ConfigurationError, TransferError};
use crate::models::TransferOutcome;
use crate::telemetry;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use object_storage::ObjectStorageTransfer;
pub use sftp::{SftpAuth, SftpTransfer};
pub use webhook::WebhookTransfer;

/// Pause after a failed upload before the next file
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_millis(500);

/// Where a pipeline run delivers its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Extraction only
    Disabled,
    /// `<root>/<target>/<category>` on the configured SFTP server
    Sftp { category: String },
    /// One bucket of the configured object store
    ObjectStorage { bucket: Option<String> },
    /// Multipart POSTs to the configured webhook
    Webhook,
}

impl Destination {
    /// Destination name handed to `put_and_verify` for `target`
    pub fn name_for(&self, target: &str) -> String {
        match self {
            Destination::ObjectStorage {
                bucket: Some(bucket),
            } => bucket.clone(),
            Destination::ObjectStorage { bucket: None } => bucket_name_for(target),
            _ => target.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Destination::Disabled)
    }
}

/// Bucket name derived from a target: lowercase, anything outside `[a-z0-9-]` becomes `-`
pub fn bucket_name_for(target: &str) -> String {
    target
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// A remote destination that accepts files.
///
/// Backends implement the primitives; `put_and_verify` drives them the same
/// way for every backend.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Short backend label used in logs and metrics
    fn backend(&self) -> &'static str;

    /// Establish or re-validate the session. Never panics.
    async fn connect(&mut self) -> bool;

    /// Make `remote_path` usable as an upload target
    async fn ensure_destination(&mut self, remote_path: &str) -> bool;

    /// Remote path for a destination name
    fn resolve_destination(&self, destination_name: &str) -> String;

    /// Upload one local file, overwriting any remote file of the same name
    async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        file_name: &str,
    ) -> Result<(), TransferError>;

    /// Remote size after upload; `None` when it cannot be determined
    async fn remote_file_size(&mut self, remote_path: &str, file_name: &str) -> Option<u64>;

    async fn disconnect(&mut self);

    fn failure_backoff(&self) -> Duration {
        DEFAULT_FAILURE_BACKOFF
    }

    /// Upload `files` to the destination and compare remote sizes.
    ///
    /// A size mismatch is logged but still counts as uploaded, as does a size
    /// that cannot be read back.
    async fn put_and_verify(&mut self, destination_name: &str, files: &[PathBuf]) -> TransferOutcome {
        let remote_path = self.resolve_destination(destination_name);

        if !self.connect().await {
            return TransferOutcome::aborted(
                remote_path,
                format!("{} connection failed", self.backend()),
            );
        }

        if !self.ensure_destination(&remote_path).await {
            return TransferOutcome::aborted(
                remote_path.clone(),
                format!("Failed to prepare destination {}", remote_path),
            );
        }

        let mut uploaded_files = Vec::new();
        let mut failed_files = Vec::new();

        for file in files {
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| file.display().to_string());

            let local_size = match tokio::fs::metadata(file).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    warn!(file = %file.display(), "Local file not found");
                    telemetry::record_upload_outcome(self.backend(), false);
                    failed_files.push(file_name);
                    continue;
                }
            };

            match self.upload_file(file, &remote_path, &file_name).await {
                Ok(()) => {
                    match self.remote_file_size(&remote_path, &file_name).await {
                        Some(remote) if remote != local_size => {
                            let mismatch = TransferError::VerificationMismatch {
                                file: file_name.clone(),
                                local: local_size,
                                remote,
                            };
                            warn!(error = %mismatch, "Upload size verification failed");
                        }
                        Some(_) => debug!(file = %file_name, "Upload verified"),
                        None => debug!(file = %file_name, "Upload size could not be verified"),
                    }
                    telemetry::record_upload_outcome(self.backend(), true);
                    uploaded_files.push(file_name);
                }
                Err(e) => {
                    error!(file = %file_name, remote_path = %remote_path, error = %e, "Upload failed");
                    telemetry::record_upload_outcome(self.backend(), false);
                    failed_files.push(file_name);
                    tokio::time::sleep(self.failure_backoff()).await;
                }
            }
        }

        let message = format!(
            "Uploaded {}/{} files to {}",
            uploaded_files.len(),
            files.len(),
            remote_path
        );
        info!(backend = self.backend(), "{}", message);

        TransferOutcome {
            success: failed_files.is_empty(),
            message,
            remote_path,
            uploaded_files,
            failed_files,
        }
    }
}

/// Creates a fresh transfer client for one pipeline run
pub trait TransferClientFactory: Send + Sync {
    fn create(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn TransferClient>, ConfigurationError>;
}

/// Factory backed by the SFTP, object storage and webhook settings
#[derive(Debug, Clone, Default)]
pub struct ConfiguredTransfers {
    sftp: Option<SftpConfig>,
    object_storage: Option<ObjectStorageConfig>,
    webhook: Option<WebhookConfig>,
}

impl ConfiguredTransfers {
    pub fn new(sftp: Option<SftpConfig>, object_storage: Option<ObjectStorageConfig>) -> Self {
        Self {
            sftp,
            object_storage,
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: Option<WebhookConfig>) -> Self {
        self.webhook = webhook;
        self
    }
}

impl TransferClientFactory for ConfiguredTransfers {
    fn create(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn TransferClient>, ConfigurationError> {
        match destination {
            Destination::Disabled => Err(ConfigurationError::Invalid(
                "transfer is disabled for this run".to_string(),
            )),
            Destination::Sftp { category } => {
                let config = self
                    .sftp
                    .as_ref()
                    .ok_or_else(|| ConfigurationError::MissingCredentials("sftp".to_string()))?;
                Ok(Box::new(SftpTransfer::from_config(config, category)?))
            }
            Destination::ObjectStorage { .. } => {
                let config = self.object_storage.as_ref().ok_or_else(|| {
                    ConfigurationError::MissingCredentials("object storage".to_string())
                })?;
                Ok(Box::new(ObjectStorageTransfer::from_config(config)?))
            }
            Destination::Webhook => {
                let config = self
                    .webhook
                    .as_ref()
                    .ok_or_else(|| ConfigurationError::MissingCredentials("webhook".to_string()))?;
                Ok(Box::new(WebhookTransfer::from_config(config)?))
            }
        }
    }
}

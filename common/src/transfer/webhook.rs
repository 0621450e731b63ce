// Webhook transfer backend: one multipart POST per file

use super::TransferClient;
use crate::config::WebhookConfig;
use crate::errors::{ConfigurationError, TransferError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Form fields every request carries; configured extras cannot override them
const RESERVED_FIELDS: [&str; 4] = ["filename", "file_size", "file_type", "destination"];

/// Posts each file to a single HTTP endpoint.
///
/// The receiver owns storage, so there is no directory to prepare and no
/// size to read back.
pub struct WebhookTransfer {
    url: String,
    credentials: Option<(String, String)>,
    fields: BTreeMap<String, String>,
    client: Client,
}

impl WebhookTransfer {
    #[instrument(skip(credentials, extra_fields), fields(url = %url))]
    pub fn new(
        url: &str,
        timeout: Duration,
        credentials: Option<(String, String)>,
        extra_fields: BTreeMap<String, String>,
    ) -> Result<Self, ConfigurationError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ConfigurationError::Invalid(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            url: url.to_string(),
            credentials,
            fields: extra_fields,
            client,
        })
    }

    pub fn from_config(config: &WebhookConfig) -> Result<Self, ConfigurationError> {
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            (None, None) => None,
            _ => return Err(ConfigurationError::MissingCredentials("webhook".to_string())),
        };

        Self::new(
            &config.url,
            Duration::from_secs(config.timeout_seconds),
            credentials,
            config.fields.clone(),
        )
    }

    fn form(&self, data: Vec<u8>, remote_path: &str, file_name: &str) -> Result<Form, TransferError> {
        let size = data.len();
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| TransferError::UploadFailed(format!("Invalid file part: {}", e)))?;

        let mut form = Form::new()
            .part("file", part)
            .text("filename", file_name.to_string())
            .text("file_size", size.to_string())
            .text("file_type", "parquet")
            .text("destination", remote_path.to_string());
        for (name, value) in &self.fields {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                debug!(field = %name, "Ignoring extra field that shadows a built-in one");
                continue;
            }
            form = form.text(name.clone(), value.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl TransferClient for WebhookTransfer {
    fn backend(&self) -> &'static str {
        "webhook"
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&mut self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Webhook reachable");
                true
            }
            Err(e) => {
                error!(error = %e, "Webhook unreachable");
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

    #[instrument(skip(self, local_path), fields(url = %self.url, file = %file_name))]
    async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        file_name: &str,
    ) -> Result<(), TransferError> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            TransferError::UploadFailed(format!("Failed to read {}: {}", local_path.display(), e))
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .multipart(self.form(data, remote_path, file_name)?);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            TransferError::UploadFailed(format!("Failed to post '{}': {}", file_name, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::UploadFailed(format!(
                "Webhook rejected '{}' with status {}: {}",
                file_name, status, body
            )));
        }

        debug!(status = %status, "File posted");
        Ok(())
    }

    async fn remote_file_size(&mut self, _remote_path: &str, _file_name: &str) -> Option<u64> {
        None
    }

    async fn disconnect(&mut self) {
        info!(url = %self.url, "Webhook transfer finished");
    }
}

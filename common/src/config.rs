// Configuration management with layered configuration (file, env)

use crate::errors::ConfigurationError;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// SFTP destination; pipelines that deliver over SFTP fail closed when absent
    #[serde(default)]
    pub sftp: Option<SftpConfig>,
    /// S3-compatible object storage destination
    #[serde(default)]
    pub object_storage: Option<ObjectStorageConfig>,
    /// HTTP endpoint receiving each file as a multipart POST
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Directory holding one `*.sql` file per named query
    pub query_dir: PathBuf,
    /// Default base directory for extraction output
    pub output_dir: PathBuf,
    /// Root for per-run temporary directories of the storage pipeline
    pub scratch_dir: PathBuf,
    /// Category segment used in SFTP destination paths
    pub category: String,
    /// Ordered set of database targets
    pub targets: Vec<String>,
    /// Parquet compression codec: "snappy" or "none"
    pub compression: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            query_dir: PathBuf::from("sql"),
            output_dir: PathBuf::from("data"),
            scratch_dir: std::env::temp_dir(),
            category: "data".to_string(),
            targets: Vec::new(),
            compression: "snappy".to_string(),
        }
    }
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    Mssql,
    Postgres,
    Mysql,
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseDriver::Mssql => write!(f, "mssql"),
            DatabaseDriver::Postgres => write!(f, "postgres"),
            DatabaseDriver::Mysql => write!(f, "mysql"),
        }
    }
}

impl FromStr for DatabaseDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(DatabaseDriver::Mssql),
            "postgres" | "postgresql" => Ok(DatabaseDriver::Postgres),
            "mysql" => Ok(DatabaseDriver::Mysql),
            _ => Err(format!("Unknown database driver: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: DatabaseDriver,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_seconds: u64,
    pub query_timeout_seconds: u64,
    pub trust_server_certificate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::Mssql,
            host: "localhost".to_string(),
            port: 1433,
            username: None,
            password: None,
            connect_timeout_seconds: 30,
            query_timeout_seconds: 600,
            trust_server_certificate: false,
        }
    }
}

impl DatabaseConfig {
    /// Explicitly configured credentials; there is no fallback login
    pub fn credentials(&self) -> Result<(&str, &str), ConfigurationError> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(password)) if !user.is_empty() => Ok((user, password)),
            _ => Err(ConfigurationError::MissingCredentials(
                "database".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// Leading segment of every destination path
    #[serde(default = "default_sftp_root")]
    pub root: String,
    #[serde(default = "default_sftp_timeout")]
    pub timeout_seconds: u64,
}

fn default_sftp_port() -> u16 {
    22
}

fn default_sftp_root() -> String {
    "ai".to_string()
}

fn default_sftp_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// S3-compatible endpoint including scheme, e.g. `https://<project>.supabase.co/storage/v1/s3`
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
    /// Basic auth is sent only when both halves are configured
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Extra form fields sent with every file
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_webhook_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Upper bound on retained jobs; oldest finished jobs are evicted first
    pub max_retained: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("extraction.targets")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.extraction.query_dir.as_os_str().is_empty() {
            return Err("Extraction query_dir cannot be empty".to_string());
        }
        if self.extraction.targets.iter().any(|t| t.trim().is_empty()) {
            return Err("Extraction targets cannot contain empty names".to_string());
        }

        if self.database.host.is_empty() {
            return Err("Database host cannot be empty".to_string());
        }
        if self.database.connect_timeout_seconds == 0 {
            return Err("Database connect_timeout_seconds must be greater than 0".to_string());
        }
        self.database
            .credentials()
            .map_err(|_| "Database username and password must be configured".to_string())?;

        if let Some(sftp) = &self.sftp {
            if sftp.host.is_empty() || sftp.username.is_empty() {
                return Err("SFTP host and username cannot be empty".to_string());
            }
            if sftp.password.is_none() && sftp.private_key_path.is_none() {
                return Err("SFTP requires a password or a private_key_path".to_string());
            }
        }

        if let Some(storage) = &self.object_storage {
            if storage.endpoint.is_empty() {
                return Err("Object storage endpoint cannot be empty".to_string());
            }
            if storage.access_key.is_none() || storage.secret_key.is_none() {
                return Err("Object storage access_key and secret_key must be configured".to_string());
            }
        }

        if let Some(webhook) = &self.webhook {
            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err("Webhook url must be an http(s) URL".to_string());
            }
            if webhook.username.is_some() != webhook.password.is_some() {
                return Err("Webhook username and password must be configured together".to_string());
            }
            if webhook.timeout_seconds == 0 {
                return Err("Webhook timeout_seconds must be greater than 0".to_string());
            }
        }

        if self.jobs.max_retained == Some(0) {
            return Err("Jobs max_retained must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        let mut settings = Settings::default();
        settings.database.username = Some("etl".to_string());
        settings.database.password = Some("secret".to_string());
        settings
    }

    #[test]
    fn test_default_settings_fail_closed_without_credentials() {
        let settings = Settings::default();
        assert!(settings.validate().is_err());
        assert!(settings.database.credentials().is_err());
    }

    #[test]
    fn test_explicit_credentials_are_valid() {
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_validation_catches_zero_port() {
        let mut settings = configured();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_sftp_without_auth() {
        let mut settings = configured();
        settings.sftp = Some(SftpConfig {
            host: "sftp.example.com".to_string(),
            port: 22,
            username: "uploader".to_string(),
            password: None,
            private_key_path: None,
            root: "ai".to_string(),
            timeout_seconds: 30,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_object_storage_without_keys() {
        let mut settings = configured();
        settings.object_storage = Some(ObjectStorageConfig {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key: Some("key".to_string()),
            secret_key: None,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_half_configured_webhook_auth() {
        let mut settings = configured();
        settings.webhook = Some(WebhookConfig {
            url: "https://hooks.example.internal/files".to_string(),
            timeout_seconds: 30,
            username: Some("etl".to_string()),
            password: None,
            fields: BTreeMap::new(),
        });
        assert!(settings.validate().is_err());

        if let Some(webhook) = settings.webhook.as_mut() {
            webhook.password = Some("secret".to_string());
        }
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_webhook_without_scheme() {
        let mut settings = configured();
        settings.webhook = Some(WebhookConfig {
            url: "hooks.example.internal/files".to_string(),
            timeout_seconds: 30,
            username: None,
            password: None,
            fields: BTreeMap::new(),
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_driver_parsing() {
        assert_eq!("SQLServer".parse::<DatabaseDriver>(), Ok(DatabaseDriver::Mssql));
        assert_eq!("postgresql".parse::<DatabaseDriver>(), Ok(DatabaseDriver::Postgres));
        assert!("oracle".parse::<DatabaseDriver>().is_err());
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load_from_path(dir.path()).expect("load");
        assert_eq!(settings.extraction.category, "data");
        assert!(settings.sftp.is_none());
    }
}

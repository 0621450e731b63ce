// Database connectivity: one short-lived connection per query execution

pub mod mssql;
pub mod mysql;
pub mod postgresql;

use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::errors::{ConfigurationError, ExecutionError};
use crate::models::QueryResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use mssql::MssqlRunner;
pub use mysql::MySqlRunner;
pub use postgresql::PostgresRunner;

/// Runs one query against one named database target.
///
/// Implementations open their own connection for each call and release it
/// on every exit path.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError>;
}

/// Server address and credentials shared by every target on the server
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub trust_server_certificate: bool,
}

impl ConnectionSettings {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConfigurationError> {
        let (username, password) = config.credentials()?;
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            username: username.to_string(),
            password: password.to_string(),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            query_timeout: Duration::from_secs(config.query_timeout_seconds),
            trust_server_certificate: config.trust_server_certificate,
        })
    }
}

/// Build the runner matching the configured driver
pub fn create_query_runner(
    config: &DatabaseConfig,
) -> Result<Arc<dyn QueryRunner>, ConfigurationError> {
    let settings = ConnectionSettings::from_config(config)?;
    tracing::info!(driver = %config.driver, host = %settings.host, port = settings.port, "Creating query runner");

    let runner: Arc<dyn QueryRunner> = match config.driver {
        DatabaseDriver::Mssql => Arc::new(MssqlRunner::new(settings)),
        DatabaseDriver::Postgres => Arc::new(PostgresRunner::new(settings)),
        DatabaseDriver::Mysql => Arc::new(MySqlRunner::new(settings)),
    };
    Ok(runner)
}

/// Bound a database future by `limit`
pub(crate) async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, ExecutionError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ExecutionError::Timeout(limit.as_secs()))?
}

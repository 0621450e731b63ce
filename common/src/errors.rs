// Error handling framework for extraction, transfer and job tracking

use thiserror::Error;

/// Configuration errors detected before any I/O is attempted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Database '{target}' not configured")]
    NotConfigured {
        target: String,
        available: Vec<String>,
    },

    #[error("Query directory not found: {0}")]
    QueryDirectoryMissing(String),

    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while running a single (target, query) pair
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Database connection failed: {0}")]
    DatabaseConnectionFailed(String),

    #[error("Database query failed: {0}")]
    DatabaseQueryFailed(String),

    #[error("Table write failed: {0}")]
    TableWriteFailed(String),

    #[error("Execution timeout after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transfer backend errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Directory creation failed: {0}")]
    DirectoryCreationFailed(String),

    #[error("Size mismatch for {file}: local {local} bytes, remote {remote} bytes")]
    VerificationMismatch {
        file: String,
        local: u64,
        remote: u64,
    },
}

/// Job registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

/// Fatal errors that abort a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline aborted: {0}")]
    Fatal(String),
}

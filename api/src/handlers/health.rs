use axum::Json;
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "etl-pipeline";

/// Health check endpoint
#[tracing::instrument]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}

/// Service information and endpoint listing
#[tracing::instrument]
pub async fn index() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Extracts database query results to Parquet and delivers them over SFTP or object storage",
        "endpoints": {
            "GET /health": "Health check",
            "POST /run-pipeline": "Extract every target and deliver over SFTP",
            "POST /run-pipeline/{target}": "Extract one target, optionally deliver over SFTP",
            "POST /upload/{target}": "Upload extracted files of one target to object storage",
            "POST /run-storage-pipeline/{target}": "Extract one target into a scratch directory and upload to object storage",
            "GET /jobs": "List jobs, newest first",
            "GET /jobs/{jobId}": "Job detail",
            "GET /metrics": "Prometheus metrics",
        },
    }))
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::handlers::ErrorResponse;
use crate::state::AppState;
use common::models::{Job, JobKind, JobRequest, JobStatus};
use common::transfer::bucket_name_for;

const DEFAULT_OUTPUT_DIR: &str = "data";
const DEFAULT_CATEGORY: &str = "data";

/// Body of the pipeline endpoints; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineParams {
    pub output_dir: Option<PathBuf>,
    pub category: Option<String>,
    pub verbose: Option<bool>,
    pub transfer_enabled: Option<bool>,
}

/// Body of the object storage endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageParams {
    pub destination_name: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub scratch_dir: Option<PathBuf>,
}

/// Returned as soon as a job is registered
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_name: Option<String>,
}

impl JobAccepted {
    fn from_job(job: &Job, message: String) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            message,
            started_at: job.created_at,
            destination_name: job.request.destination_name.clone(),
        }
    }
}

fn validate_target(target: &str) -> Result<(), ErrorResponse> {
    if target.is_empty() || target == "." || target == ".." || target.contains(['/', '\\']) {
        return Err(ErrorResponse::new(
            "validation_error",
            format!("Invalid target name: {}", target),
        ));
    }
    Ok(())
}

/// An empty body means defaults; anything else must be valid JSON for `T`
fn parse_params<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ErrorResponse::new("validation_error", format!("Invalid request body: {}", e))
    })
}

/// Start the full pipeline over every configured target
#[tracing::instrument(skip(state, body))]
pub async fn run_pipeline(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<JobAccepted>, ErrorResponse> {
    let params: PipelineParams = parse_params(&body)?;
    let request = JobRequest {
        kind: JobKind::Pipeline,
        target: None,
        output_dir: params
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        category: params
            .category
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        verbose: params.verbose.unwrap_or(true),
        transfer_enabled: params.transfer_enabled.unwrap_or(true),
        destination_name: None,
        scratch_dir: None,
    };

    let job = state.runner.submit(request);
    tracing::info!(job_id = %job.job_id, "Pipeline job accepted");
    Ok(Json(JobAccepted::from_job(
        &job,
        format!(
            "Pipeline started in background. Use GET /jobs/{} to check status",
            job.job_id
        ),
    )))
}

/// Start the pipeline for one target
#[tracing::instrument(skip(state, body))]
pub async fn run_target_pipeline(
    State(state): State<AppState>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<JobAccepted>, ErrorResponse> {
    validate_target(&target)?;
    let params: PipelineParams = parse_params(&body)?;
    let request = JobRequest {
        kind: JobKind::TargetPipeline,
        target: Some(target.clone()),
        output_dir: params
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        category: params
            .category
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        verbose: params.verbose.unwrap_or(true),
        transfer_enabled: params.transfer_enabled.unwrap_or(true),
        destination_name: None,
        scratch_dir: None,
    };

    let job = state.runner.submit(request);
    tracing::info!(job_id = %job.job_id, target = %target, "Target pipeline job accepted");
    Ok(Json(JobAccepted::from_job(
        &job,
        format!("Pipeline for {} started in background", target),
    )))
}

/// Upload already extracted files of one target to object storage
#[tracing::instrument(skip(state, body))]
pub async fn upload_target(
    State(state): State<AppState>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<JobAccepted>, ErrorResponse> {
    validate_target(&target)?;
    let params: StorageParams = parse_params(&body)?;
    let destination = params
        .destination_name
        .unwrap_or_else(|| bucket_name_for(&target));

    let request = JobRequest {
        kind: JobKind::Upload,
        target: Some(target.clone()),
        output_dir: params
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        category: DEFAULT_CATEGORY.to_string(),
        verbose: params.verbose.unwrap_or(true),
        transfer_enabled: true,
        destination_name: Some(destination.clone()),
        scratch_dir: None,
    };

    let job = state.runner.submit(request);
    tracing::info!(job_id = %job.job_id, target = %target, destination = %destination, "Upload job accepted");
    Ok(Json(JobAccepted::from_job(
        &job,
        format!("Upload of {} to {} started in background", target, destination),
    )))
}

/// Extract one target into a scratch directory and upload it to object storage
#[tracing::instrument(skip(state, body))]
pub async fn run_storage_pipeline(
    State(state): State<AppState>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<JobAccepted>, ErrorResponse> {
    validate_target(&target)?;
    let params: StorageParams = parse_params(&body)?;
    let destination = params
        .destination_name
        .unwrap_or_else(|| bucket_name_for(&target));

    let request = JobRequest {
        kind: JobKind::StoragePipeline,
        target: Some(target.clone()),
        output_dir: state.config.extraction.scratch_dir.clone(),
        category: DEFAULT_CATEGORY.to_string(),
        verbose: params.verbose.unwrap_or(true),
        transfer_enabled: true,
        destination_name: Some(destination.clone()),
        scratch_dir: params.scratch_dir,
    };

    let job = state.runner.submit(request);
    tracing::info!(job_id = %job.job_id, target = %target, destination = %destination, "Storage pipeline job accepted");
    Ok(Json(JobAccepted::from_job(
        &job,
        format!(
            "Storage pipeline for {} to {} started in background",
            target, destination
        ),
    )))
}

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::handlers::ErrorResponse;
use crate::state::AppState;
use common::errors::JobError;
use common::models::{Job, JobSummary};

/// Listing of all retained jobs
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobList {
    pub total_jobs: usize,
    pub jobs: Vec<JobSummary>,
}

/// Get job detail by id
#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ErrorResponse> {
    // Ids that do not parse cannot name a job either
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| ErrorResponse::new("not_found", format!("Job {} not found", job_id)))?;

    state.registry().get(&id).map(Json).map_err(|e| match e {
        JobError::NotFound(_) => ErrorResponse::new("not_found", format!("Job {} not found", job_id)),
        other => ErrorResponse::new("internal_error", other.to_string()),
    })
}

/// List jobs, newest first
#[tracing::instrument(skip(state))]
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobList> {
    let jobs = state.registry().list();
    Json(JobList {
        total_jobs: jobs.len(),
        jobs,
    })
}

// Domain models for queries, extraction/transfer reports and jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// A named, parameterless SQL text loaded from the query directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub name: String,
    pub text: String,
}

/// Tabular result of one query: ordered column names and rows of JSON cells.
///
/// Exact decimals travel as strings; `decimal_scales` marks those columns
/// by index with the scale to store them at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub decimal_scales: BTreeMap<usize, u8>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            columns,
            rows,
            decimal_scales: BTreeMap::new(),
        }
    }

    /// Mark `column` as decimal, widening to the largest scale seen
    pub fn note_decimal_scale(&mut self, column: usize, scale: u8) {
        let entry = self.decimal_scales.entry(column).or_insert(scale);
        *entry = (*entry).max(scale);
    }

    pub fn decimal_scale(&self, column: usize) -> Option<u8> {
        self.decimal_scales.get(&column).copied()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Outcome of a single (target, query) execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Error,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success => write!(f, "success"),
            ExecutionOutcome::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub database: String,
    pub query: String,
    pub rows: Option<usize>,
    pub cols: Option<usize>,
    pub elapsed_seconds: f64,
    pub status: ExecutionOutcome,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn succeeded(
        database: &str,
        query: &str,
        rows: usize,
        cols: usize,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            database: database.to_string(),
            query: query.to_string(),
            rows: Some(rows),
            cols: Some(cols),
            elapsed_seconds,
            status: ExecutionOutcome::Success,
            error: None,
        }
    }

    pub fn failed(database: &str, query: &str, elapsed_seconds: f64, error: String) -> Self {
        Self {
            database: database.to_string(),
            query: query.to_string(),
            rows: None,
            cols: None,
            elapsed_seconds,
            status: ExecutionOutcome::Error,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionOutcome::Success
    }
}

/// Aggregate result of an extraction batch.
///
/// `success` reports whether the batch could run at all; individual pair
/// failures are only reflected in `failed`, `errors` and `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub details: Vec<ExecutionRecord>,
    pub total_time: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_targets: Option<Vec<String>>,
}

impl ExtractionReport {
    pub fn new(target: Option<String>) -> Self {
        Self {
            target,
            total_executions: 0,
            successful: 0,
            failed: 0,
            errors: Vec::new(),
            details: Vec::new(),
            total_time: 0.0,
            success: true,
            error: None,
            available_targets: None,
        }
    }

    /// Report for a batch that could not start
    pub fn aborted(target: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(target)
        }
    }

    /// Report for a target outside the configured set
    pub fn not_configured(target: &str, available: Vec<String>) -> Self {
        Self {
            available_targets: Some(available),
            ..Self::aborted(
                Some(target.to_string()),
                format!("Database '{}' not configured", target),
            )
        }
    }

    /// Fold one execution record into the counters
    pub fn record(&mut self, record: ExecutionRecord) {
        self.total_executions += 1;
        if record.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
            self.errors.push(format!(
                "Database: {}, Query: {}.sql, Error: {}",
                record.database,
                record.query,
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
        self.details.push(record);
    }

    /// Targets with at least one successful record, in execution order
    pub fn successful_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for record in self.details.iter().filter(|r| r.is_success()) {
            if !targets.contains(&record.database) {
                targets.push(record.database.clone());
            }
        }
        targets
    }
}

/// Result of one `put_and_verify` call against a single destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
    pub remote_path: String,
    pub uploaded_files: Vec<String>,
    pub failed_files: Vec<String>,
}

impl TransferOutcome {
    /// Outcome when nothing could be attempted
    pub fn aborted(remote_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            remote_path: remote_path.into(),
            uploaded_files: Vec::new(),
            failed_files: Vec::new(),
        }
    }
}

/// Aggregate of all transfer outcomes of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub success: bool,
    pub total_uploads: usize,
    pub successful_uploads: usize,
    pub failed_uploads: usize,
    pub targets_processed: Vec<String>,
    pub errors: Vec<String>,
    pub outcomes: Vec<TransferOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferReport {
    pub fn new() -> Self {
        Self {
            success: true,
            total_uploads: 0,
            successful_uploads: 0,
            failed_uploads: 0,
            targets_processed: Vec::new(),
            errors: Vec::new(),
            outcomes: Vec::new(),
            error: None,
        }
    }

    /// Report for a transfer phase that failed before any upload
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new()
        }
    }

    /// Fold the outcome of one target into the report
    pub fn absorb(&mut self, target: &str, outcome: TransferOutcome) {
        self.targets_processed.push(target.to_string());
        self.total_uploads += outcome.uploaded_files.len() + outcome.failed_files.len();
        self.successful_uploads += outcome.uploaded_files.len();
        self.failed_uploads += outcome.failed_files.len();
        if !outcome.success {
            self.errors.push(format!("{}: {}", target, outcome.message));
        }
        self.success = self.error.is_none() && self.errors.is_empty();
        self.outcomes.push(outcome);
    }
}

impl Default for TransferReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Job lifecycle status; transitions are monotonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// pending → running → completed | failed; a pending job may also fail directly
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// What a job does once it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Extract every target and deliver over SFTP
    Pipeline,
    /// Extract one target, optionally deliver over SFTP
    TargetPipeline,
    /// Deliver already extracted files of one target to object storage
    Upload,
    /// Extract one target into a scratch directory and deliver to object storage
    StoragePipeline,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Pipeline => write!(f, "pipeline"),
            JobKind::TargetPipeline => write!(f, "target_pipeline"),
            JobKind::Upload => write!(f, "upload"),
            JobKind::StoragePipeline => write!(f, "storage_pipeline"),
        }
    }
}

/// Parameters captured at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub kind: JobKind,
    pub target: Option<String>,
    pub output_dir: PathBuf,
    pub category: String,
    pub verbose: bool,
    pub transfer_enabled: bool,
    pub destination_name: Option<String>,
    pub scratch_dir: Option<PathBuf>,
}

impl JobRequest {
    pub fn pipeline(output_dir: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Pipeline,
            target: None,
            output_dir: output_dir.into(),
            category: category.into(),
            verbose: true,
            transfer_enabled: true,
            destination_name: None,
            scratch_dir: None,
        }
    }

    pub fn for_target(kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: Some(target.into()),
            ..Self::pipeline("data", "data")
        }
    }
}

/// A tracked unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub request: JobRequest,
    pub extraction: Option<ExtractionReport>,
    pub transfer: Option<TransferReport>,
    pub error: Option<String>,
    pub note: Option<String>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            kind: request.kind,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            request,
            extraction: None,
            transfer: None,
            error: None,
            note: None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            kind: self.kind,
            target: self.request.target.clone(),
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Compact listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub target: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_scale_widens() {
        let mut table = QueryResult::new(vec!["amount".to_string()], Vec::new());
        table.note_decimal_scale(0, 2);
        table.note_decimal_scale(0, 4);
        table.note_decimal_scale(0, 1);

        assert_eq!(table.decimal_scale(0), Some(4));
        assert_eq!(table.decimal_scale(1), None);
    }

    #[test]
    fn test_job_status_display_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_job_status_never_regresses() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_extraction_report_counts_failures() {
        let mut report = ExtractionReport::new(None);
        report.record(ExecutionRecord::succeeded("DB1", "clients", 3, 2, 0.1));
        report.record(ExecutionRecord::failed("DB2", "orders", 0.2, "timeout".to_string()));

        assert_eq!(report.total_executions, 2);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.errors,
            vec!["Database: DB2, Query: orders.sql, Error: timeout".to_string()]
        );
        assert_eq!(report.successful_targets(), vec!["DB1".to_string()]);
    }

    #[test]
    fn test_transfer_report_absorbs_partial_failure() {
        let mut report = TransferReport::new();
        report.absorb(
            "DB1",
            TransferOutcome {
                success: false,
                message: "Upload data: 1/2 files".to_string(),
                remote_path: "ai/DB1/data".to_string(),
                uploaded_files: vec!["a.parquet".to_string()],
                failed_files: vec!["b.parquet".to_string()],
            },
        );

        assert!(!report.success);
        assert_eq!(report.total_uploads, 2);
        assert_eq!(report.successful_uploads, 1);
        assert_eq!(report.failed_uploads, 1);
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job::new(JobRequest::pipeline("data", "data"));
        let value = serde_json::to_value(&job).expect("serialize");
        assert!(value.get("jobId").is_some());
        assert_eq!(value["status"], "pending");
    }
}

// End-to-end tests: query files on disk, job submission, extraction to Parquet
// and delivery through an in-memory transfer backend.

use async_trait::async_trait;
use common::database::QueryRunner;
use common::errors::{ConfigurationError, ExecutionError, TransferError};
use common::extractor::Extractor;
use common::jobs::{JobRegistry, JobRunner};
use common::models::{Job, JobKind, JobRequest, JobStatus, QueryResult};
use common::orchestrator::PipelineOrchestrator;
use common::query_source::QuerySource;
use common::table_writer::ParquetTableWriter;
use common::transfer::{
    bucket_name_for, ConfiguredTransfers, Destination, TransferClient, TransferClientFactory,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Orders are missing on DB2; everything else returns two rows
struct WarehouseRunner;

#[async_trait]
impl QueryRunner for WarehouseRunner {
    async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError> {
        if target == "DB2" && query.contains("orders") {
            return Err(ExecutionError::DatabaseQueryFailed(
                "Invalid object name 'orders'".to_string(),
            ));
        }
        Ok(QueryResult::new(
            vec!["id".to_string(), "amount".to_string(), "label".to_string()],
            vec![
                vec![json!(1), json!(10.5), json!("first")],
                vec![json!(2), json!(null), json!("second")],
            ],
        ))
    }
}

/// Remote files keyed by `<destination>/<file>`
type RemoteFiles = Arc<Mutex<BTreeMap<String, u64>>>;

struct RecordingTransfers {
    files: RemoteFiles,
}

impl TransferClientFactory for RecordingTransfers {
    fn create(
        &self,
        destination: &Destination,
    ) -> Result<Box<dyn TransferClient>, ConfigurationError> {
        let prefix = match destination {
            Destination::Sftp { category } => format!("sftp:{}", category),
            Destination::ObjectStorage { .. } => "s3".to_string(),
            Destination::Webhook => "webhook".to_string(),
            Destination::Disabled => {
                return Err(ConfigurationError::Invalid("disabled".to_string()))
            }
        };
        Ok(Box::new(RecordingClient {
            prefix,
            files: Arc::clone(&self.files),
        }))
    }
}

struct RecordingClient {
    prefix: String,
    files: RemoteFiles,
}

#[async_trait]
impl TransferClient for RecordingClient {
    fn backend(&self) -> &'static str {
        "recording"
    }

    async fn connect(&mut self) -> bool {
        true
    }

    async fn ensure_destination(&mut self, _remote_path: &str) -> bool {
        true
    }

    fn resolve_destination(&self, destination_name: &str) -> String {
        format!("{}/{}", self.prefix, destination_name)
    }

    async fn upload_file(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        file_name: &str,
    ) -> Result<(), TransferError> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| TransferError::UploadFailed(e.to_string()))?
            .len();
        self.files
            .lock()
            .unwrap()
            .insert(format!("{}/{}", remote_path, file_name), size);
        Ok(())
    }

    async fn remote_file_size(&mut self, remote_path: &str, file_name: &str) -> Option<u64> {
        self.files
            .lock()
            .unwrap()
            .get(&format!("{}/{}", remote_path, file_name))
            .copied()
    }

    async fn disconnect(&mut self) {}

    fn failure_backoff(&self) -> Duration {
        Duration::ZERO
    }
}

struct Harness {
    runner: JobRunner,
    files: RemoteFiles,
    _queries: TempDir,
    output: TempDir,
}

fn write_queries(dir: &Path) {
    std::fs::write(dir.join("clients.sql"), "SELECT id, amount, label FROM clients").unwrap();
    std::fs::write(dir.join("orders.sql"), "SELECT id, amount, label FROM orders").unwrap();
    // Empty definitions and other extensions are ignored
    std::fs::write(dir.join("draft.sql"), "   \n").unwrap();
    std::fs::write(dir.join("notes.txt"), "not a query").unwrap();
}

fn harness_with(targets: &[&str], transfers: Option<Arc<dyn TransferClientFactory>>) -> Harness {
    let queries = tempfile::tempdir().unwrap();
    write_queries(queries.path());
    let output = tempfile::tempdir().unwrap();

    let source = QuerySource::new(
        queries.path(),
        targets.iter().map(|t| t.to_string()).collect(),
    );
    let extractor = Extractor::from_source(
        &source,
        Arc::new(WarehouseRunner),
        Arc::new(ParquetTableWriter::default()),
    )
    .unwrap();

    let files: RemoteFiles = Arc::default();
    let transfers = transfers.unwrap_or_else(|| {
        Arc::new(RecordingTransfers {
            files: Arc::clone(&files),
        })
    });
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(extractor), transfers));
    let runner = JobRunner::new(JobRegistry::new(), orchestrator, output.path().join("scratch"));

    Harness {
        runner,
        files,
        _queries: queries,
        output,
    }
}

fn harness(targets: &[&str]) -> Harness {
    harness_with(targets, None)
}

async fn wait_for_terminal(runner: &JobRunner, job_id: Uuid) -> Job {
    for _ in 0..200 {
        let job = runner.registry().get(&job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", job_id);
}

fn request(kind: JobKind, target: Option<&str>, output: &Path) -> JobRequest {
    JobRequest {
        kind,
        target: target.map(str::to_string),
        output_dir: output.to_path_buf(),
        category: "data".to_string(),
        verbose: false,
        transfer_enabled: true,
        destination_name: None,
        scratch_dir: None,
    }
}

fn parquet(output: &Path, target: &str, query: &str) -> PathBuf {
    output.join(target).join(format!("{}.parquet", query))
}

#[tokio::test]
async fn test_full_pipeline_with_partial_failure() {
    let h = harness(&["DB1", "DB2"]);
    let job = h
        .runner
        .submit(request(JobKind::Pipeline, None, h.output.path()));
    assert_eq!(job.status, JobStatus::Pending);

    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let extraction = job.extraction.expect("extraction report");
    assert_eq!(extraction.total_executions, 4);
    assert_eq!(extraction.successful, 3);
    assert_eq!(extraction.failed, 1);
    assert_eq!(
        extraction.errors,
        vec!["Database: DB2, Query: orders.sql, Error: Database query failed: Invalid object name 'orders'".to_string()]
    );

    assert!(parquet(h.output.path(), "DB1", "clients").exists());
    assert!(parquet(h.output.path(), "DB1", "orders").exists());
    assert!(parquet(h.output.path(), "DB2", "clients").exists());
    assert!(!parquet(h.output.path(), "DB2", "orders").exists());
    assert!(!parquet(h.output.path(), "DB1", "draft").exists());

    let transfer = job.transfer.expect("transfer report");
    assert!(transfer.success);
    assert_eq!(transfer.successful_uploads, 3);
    assert_eq!(
        transfer.targets_processed,
        vec!["DB1".to_string(), "DB2".to_string()]
    );

    let files = h.files.lock().unwrap();
    let remote: Vec<&String> = files.keys().collect();
    assert_eq!(
        remote,
        vec![
            "sftp:data/DB1/clients.parquet",
            "sftp:data/DB1/orders.parquet",
            "sftp:data/DB2/clients.parquet",
        ]
    );
}

#[tokio::test]
async fn test_unknown_target_job_fails_with_available_targets() {
    let h = harness(&["DB1"]);
    let job = h
        .runner
        .submit(request(JobKind::TargetPipeline, Some("DB3"), h.output.path()));

    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Database 'DB3' not configured"));

    let extraction = job.extraction.expect("extraction report");
    assert!(!extraction.success);
    assert_eq!(extraction.available_targets, Some(vec!["DB1".to_string()]));
    assert!(job.transfer.is_none());
    assert!(!h.output.path().join("DB3").exists());
    assert!(h.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_extract_only_target_pipeline() {
    let h = harness(&["DB1", "DB2"]);
    let mut req = request(JobKind::TargetPipeline, Some("DB2"), h.output.path());
    req.transfer_enabled = false;
    let job = h.runner.submit(req);

    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let extraction = job.extraction.expect("extraction report");
    assert_eq!(extraction.target.as_deref(), Some("DB2"));
    assert_eq!(extraction.successful, 1);
    assert_eq!(extraction.failed, 1);
    assert!(job.transfer.is_none());
    assert!(job.note.is_some());
    assert!(!h.output.path().join("DB1").exists());
}

#[tokio::test]
async fn test_upload_after_extraction_uses_bucket_name() {
    let h = harness(&["013BW_ERP_BI"]);
    let mut extract = request(JobKind::TargetPipeline, Some("013BW_ERP_BI"), h.output.path());
    extract.transfer_enabled = false;
    let job = h.runner.submit(extract);
    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let mut upload = request(JobKind::Upload, Some("013BW_ERP_BI"), h.output.path());
    upload.destination_name = Some(bucket_name_for("013BW_ERP_BI"));
    let job = h.runner.submit(upload);
    let job = wait_for_terminal(&h.runner, job.job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.extraction.is_none());
    let transfer = job.transfer.expect("transfer report");
    assert_eq!(transfer.successful_uploads, 2);
    assert!(h
        .files
        .lock()
        .unwrap()
        .contains_key("s3/013bw-erp-bi/orders.parquet"));
}

#[tokio::test]
async fn test_storage_pipeline_leaves_no_scratch_files() {
    let h = harness(&["DB1"]);
    let job = h.runner.submit(request(
        JobKind::StoragePipeline,
        Some("DB1"),
        h.output.path(),
    ));

    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.transfer.map(|t| t.successful_uploads), Some(2));
    assert!(h.files.lock().unwrap().contains_key("s3/db1/clients.parquet"));

    let scratch = h.output.path().join("scratch");
    let leftovers = std::fs::read_dir(&scratch).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_missing_sftp_settings_fail_closed() {
    let h = harness_with(&["DB1"], Some(Arc::new(ConfiguredTransfers::default())));
    let job = h
        .runner
        .submit(request(JobKind::Pipeline, None, h.output.path()));

    let job = wait_for_terminal(&h.runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let transfer = job.transfer.expect("transfer report");
    assert!(!transfer.success);
    assert_eq!(transfer.successful_uploads, 0);
    assert!(transfer.error.is_some());
    // Extraction output stays on disk for a later upload
    assert!(parquet(h.output.path(), "DB1", "clients").exists());
}

#[tokio::test]
async fn test_jobs_are_listed_newest_first() {
    let h = harness(&["DB1"]);
    let mut first = request(JobKind::TargetPipeline, Some("DB1"), h.output.path());
    first.transfer_enabled = false;
    let first = h.runner.submit(first);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h
        .runner
        .submit(request(JobKind::TargetPipeline, Some("DB9"), h.output.path()));

    wait_for_terminal(&h.runner, first.job_id).await;
    wait_for_terminal(&h.runner, second.job_id).await;

    let jobs = h.runner.registry().list();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].job_id, second.job_id);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[1].job_id, first.job_id);
    assert_eq!(jobs[1].status, JobStatus::Completed);
}

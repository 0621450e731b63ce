// Extraction phase: run every query against every target and persist the results

use crate::database::QueryRunner;
use crate::errors::{ConfigurationError, ExecutionError};
use crate::models::{ExecutionRecord, ExtractionReport, QueryDefinition};
use crate::query_source::QuerySource;
use crate::table_writer::TableWriter;
use crate::telemetry;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Runs the cross product of targets and queries.
///
/// Query definitions are loaded once, when the extractor is built. Each
/// (target, query) pair is isolated: a failing pair is recorded in the report
/// and the batch moves on.
pub struct Extractor {
    targets: Vec<String>,
    queries: Vec<QueryDefinition>,
    runner: Arc<dyn QueryRunner>,
    writer: Arc<dyn TableWriter>,
    verbose: bool,
}

impl Extractor {
    pub fn new(
        targets: Vec<String>,
        queries: Vec<QueryDefinition>,
        runner: Arc<dyn QueryRunner>,
        writer: Arc<dyn TableWriter>,
    ) -> Self {
        Self {
            targets,
            queries,
            runner,
            writer,
            verbose: true,
        }
    }

    /// Load the query definitions from `source` and capture its targets
    pub fn from_source(
        source: &QuerySource,
        runner: Arc<dyn QueryRunner>,
        writer: Arc<dyn TableWriter>,
    ) -> Result<Self, ConfigurationError> {
        let queries = source.load_queries()?;
        Ok(Self::new(source.targets().to_vec(), queries, runner, writer))
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn queries(&self) -> &[QueryDefinition] {
        &self.queries
    }

    pub fn file_extension(&self) -> &str {
        self.writer.extension()
    }

    /// Ensure `target` belongs to the configured set
    pub fn ensure_configured(&self, target: &str) -> Result<(), ConfigurationError> {
        if self.targets.iter().any(|t| t == target) {
            Ok(())
        } else {
            Err(ConfigurationError::NotConfigured {
                target: target.to_string(),
                available: self.targets.clone(),
            })
        }
    }

    /// Run every query against every configured target.
    ///
    /// Files land in `<output_base_dir>/<target>/<query>.<ext>`.
    #[instrument(skip(self), fields(base = %output_base_dir.display()))]
    pub async fn run_all(&self, output_base_dir: &Path) -> ExtractionReport {
        self.run_all_with_verbosity(output_base_dir, self.verbose).await
    }

    /// `run_all` with a per-call verbosity override
    pub async fn run_all_with_verbosity(
        &self,
        output_base_dir: &Path,
        verbose: bool,
    ) -> ExtractionReport {
        if let Some(report) = self.precheck(None) {
            return report;
        }

        let started = Instant::now();
        let mut report = ExtractionReport::new(None);
        info!(
            targets = self.targets.len(),
            queries = self.queries.len(),
            "Starting extraction for all targets"
        );

        for target in &self.targets {
            self.run_target_into(target, output_base_dir, verbose, &mut report)
                .await;
        }

        report.total_time = started.elapsed().as_secs_f64();
        log_report(&report);
        report
    }

    /// Run every query against `target` only.
    ///
    /// An unknown target yields a failed report listing the available targets
    /// and performs no I/O.
    #[instrument(skip(self), fields(base = %output_dir.display()))]
    pub async fn run_for_target(&self, target: &str, output_dir: &Path) -> ExtractionReport {
        self.run_for_target_with_verbosity(target, output_dir, self.verbose)
            .await
    }

    /// `run_for_target` with a per-call verbosity override
    pub async fn run_for_target_with_verbosity(
        &self,
        target: &str,
        output_dir: &Path,
        verbose: bool,
    ) -> ExtractionReport {
        if let Err(ConfigurationError::NotConfigured { target, available }) =
            self.ensure_configured(target)
        {
            warn!(target = %target, available = ?available, "Target not configured");
            return ExtractionReport::not_configured(&target, available);
        }
        if let Some(report) = self.precheck(Some(target)) {
            return report;
        }

        let started = Instant::now();
        let mut report = ExtractionReport::new(Some(target.to_string()));
        self.run_target_into(target, output_dir, verbose, &mut report)
            .await;

        report.total_time = started.elapsed().as_secs_f64();
        log_report(&report);
        report
    }

    fn precheck(&self, target: Option<&str>) -> Option<ExtractionReport> {
        let target = target.map(str::to_string);
        if self.queries.is_empty() {
            warn!("No query definitions found");
            return Some(ExtractionReport::aborted(target, "No query definitions found"));
        }
        if self.targets.is_empty() {
            warn!("No databases configured");
            return Some(ExtractionReport::aborted(target, "No databases configured"));
        }
        None
    }

    async fn run_target_into(
        &self,
        target: &str,
        output_base_dir: &Path,
        verbose: bool,
        report: &mut ExtractionReport,
    ) {
        let target_dir = output_base_dir.join(target);
        let dir_ready = tokio::fs::create_dir_all(&target_dir).await;

        for query in &self.queries {
            let started = Instant::now();
            let outcome = match &dir_ready {
                Ok(()) => self.run_pair(target, query, &target_dir).await,
                Err(e) => Err(ExecutionError::TableWriteFailed(format!(
                    "Failed to create output directory {}: {}",
                    target_dir.display(),
                    e
                ))),
            };
            let elapsed = started.elapsed().as_secs_f64();

            let record = match outcome {
                Ok((rows, cols)) => {
                    if verbose {
                        info!(target = %target, query = %query.name, rows, cols, elapsed, "Query extracted");
                    } else {
                        debug!(target = %target, query = %query.name, rows, cols, elapsed, "Query extracted");
                    }
                    telemetry::record_query_outcome(true);
                    ExecutionRecord::succeeded(target, &query.name, rows, cols, elapsed)
                }
                Err(e) => {
                    error!(target = %target, query = %query.name, error = %e, "Query extraction failed");
                    telemetry::record_query_outcome(false);
                    ExecutionRecord::failed(target, &query.name, elapsed, e.to_string())
                }
            };
            report.record(record);
        }
    }

    async fn run_pair(
        &self,
        target: &str,
        query: &QueryDefinition,
        target_dir: &Path,
    ) -> Result<(usize, usize), ExecutionError> {
        let table = self.runner.execute(target, &query.text).await?;

        let writer = Arc::clone(&self.writer);
        let path = writer.file_path(target_dir, &query.name);
        let info = tokio::task::spawn_blocking(move || writer.write_table(&table, &path))
            .await
            .map_err(|e| ExecutionError::TableWriteFailed(format!("Writer task failed: {}", e)))??;

        Ok((info.rows, info.cols))
    }
}

fn log_report(report: &ExtractionReport) {
    info!(
        target = ?report.target,
        total = report.total_executions,
        successful = report.successful,
        failed = report.failed,
        total_time = report.total_time,
        "Extraction finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryResult;
    use crate::table_writer::ParquetTableWriter;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingOrders;

    #[async_trait]
    impl QueryRunner for FailingOrders {
        async fn execute(&self, target: &str, query: &str) -> Result<QueryResult, ExecutionError> {
            if query.contains("orders") && target == "DB2" {
                return Err(ExecutionError::DatabaseQueryFailed("deadlock".to_string()));
            }
            Ok(QueryResult::new(
                vec!["id".to_string()],
                vec![vec![json!(1)], vec![json!(2)]],
            ))
        }
    }

    fn query(name: &str) -> QueryDefinition {
        QueryDefinition {
            name: name.to_string(),
            text: format!("SELECT * FROM {}", name),
        }
    }

    fn extractor(targets: &[&str], queries: &[&str]) -> Extractor {
        Extractor::new(
            targets.iter().map(|t| t.to_string()).collect(),
            queries.iter().map(|q| query(q)).collect(),
            Arc::new(FailingOrders),
            Arc::new(ParquetTableWriter::default()),
        )
    }

    #[tokio::test]
    async fn test_failing_pair_does_not_stop_batch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = extractor(&["DB1", "DB2"], &["clients", "orders"])
            .run_all(dir.path())
            .await;

        assert!(report.success);
        assert_eq!(report.total_executions, 4);
        assert_eq!(report.successful, 3);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("Query: orders.sql"));
        assert!(dir.path().join("DB1").join("orders.parquet").exists());
        assert!(!dir.path().join("DB2").join("orders.parquet").exists());
    }

    #[tokio::test]
    async fn test_unknown_target_reports_available() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = extractor(&["DB1"], &["clients"])
            .run_for_target("DB3", dir.path())
            .await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap_or_default().contains("DB3"));
        assert_eq!(report.available_targets, Some(vec!["DB1".to_string()]));
        assert!(!dir.path().join("DB3").exists());
    }

    #[tokio::test]
    async fn test_empty_queries_and_targets_abort() {
        let dir = tempfile::tempdir().expect("tempdir");

        let report = extractor(&["DB1"], &[]).run_all(dir.path()).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("No query definitions found"));

        let report = extractor(&[], &["clients"]).run_all(dir.path()).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("No databases configured"));
    }
}

// Pipeline orchestration: extraction followed by conditional transfer

use crate::errors::PipelineError;
use crate::extractor::Extractor;
use crate::models::{ExtractionReport, TransferReport};
use crate::transfer::{Destination, TransferClient, TransferClientFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Phases of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    NotStarted,
    Extracting,
    Transferring,
    SkippedTransfer,
    Done,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::NotStarted => write!(f, "not_started"),
            PipelinePhase::Extracting => write!(f, "extracting"),
            PipelinePhase::Transferring => write!(f, "transferring"),
            PipelinePhase::SkippedTransfer => write!(f, "skipped_transfer"),
            PipelinePhase::Done => write!(f, "done"),
        }
    }
}

/// Result of one pipeline run.
///
/// `error` is only set for faults that prevented the run from doing its work;
/// partial failures live in the two reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub success: bool,
    pub phase: PipelinePhase,
    pub extraction: Option<ExtractionReport>,
    pub transfer: Option<TransferReport>,
    pub error: Option<String>,
    pub note: Option<String>,
}

impl PipelineRun {
    fn aborted(phase: PipelinePhase, error: impl Into<String>) -> Self {
        Self {
            success: false,
            phase,
            extraction: None,
            transfer: None,
            error: Some(error.into()),
            note: None,
        }
    }
}

/// Hook for observing phase results while a run is still in progress
pub trait PipelineObserver: Send + Sync {
    fn on_extraction(&self, _report: &ExtractionReport) {}
    fn on_transfer(&self, _report: &TransferReport) {}
}

/// Observer that ignores every event
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Sequences extraction and transfer and reconciles their outcomes
pub struct PipelineOrchestrator {
    extractor: Arc<Extractor>,
    transfers: Arc<dyn TransferClientFactory>,
}

impl PipelineOrchestrator {
    pub fn new(extractor: Arc<Extractor>, transfers: Arc<dyn TransferClientFactory>) -> Self {
        Self {
            extractor,
            transfers,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract `target` (or every target) into `output_dir`, then deliver the
    /// files of every target that produced at least one result.
    ///
    /// Transfer is skipped when nothing was extracted successfully or when the
    /// destination is disabled.
    #[instrument(skip(self, observer), fields(output_dir = %output_dir.display()))]
    pub async fn run(
        &self,
        target: Option<&str>,
        output_dir: &Path,
        destination: &Destination,
        verbose: bool,
        observer: &dyn PipelineObserver,
    ) -> PipelineRun {
        info!(phase = %PipelinePhase::Extracting, "Pipeline phase started");
        let extraction = match target {
            Some(target) => {
                self.extractor
                    .run_for_target_with_verbosity(target, output_dir, verbose)
                    .await
            }
            None => {
                self.extractor
                    .run_all_with_verbosity(output_dir, verbose)
                    .await
            }
        };
        observer.on_extraction(&extraction);

        if !extraction.success {
            let error = extraction
                .error
                .clone()
                .unwrap_or_else(|| "Extraction failed".to_string());
            error!(error = %error, "Extraction phase failed, transfer not attempted");
            return PipelineRun {
                extraction: Some(extraction),
                ..PipelineRun::aborted(PipelinePhase::Extracting, error)
            };
        }

        if !destination.is_enabled() {
            info!("Transfer disabled for this run");
            return self.finish_without_transfer(extraction, "Transfer disabled for this run");
        }
        if extraction.successful == 0 {
            warn!("No successful extraction, transfer skipped");
            return self.finish_without_transfer(
                extraction,
                "No files were extracted successfully, transfer skipped",
            );
        }

        info!(phase = %PipelinePhase::Transferring, "Pipeline phase started");
        let targets = extraction.successful_targets();
        let transfer = self.transfer(&targets, output_dir, destination).await;
        observer.on_transfer(&transfer);

        let success = transfer.success;
        info!(
            successful_uploads = transfer.successful_uploads,
            failed_uploads = transfer.failed_uploads,
            success = success,
            "Pipeline finished"
        );
        PipelineRun {
            success,
            phase: PipelinePhase::Done,
            extraction: Some(extraction),
            transfer: Some(transfer),
            error: None,
            note: None,
        }
    }

    /// Storage pipeline: extract `target` into a temporary directory under
    /// `scratch_root`, deliver it, and remove the directory whatever happens.
    #[instrument(skip(self, observer), fields(scratch_root = %scratch_root.display()))]
    pub async fn run_with_scratch(
        &self,
        target: &str,
        scratch_root: &Path,
        destination: &Destination,
        verbose: bool,
        observer: &dyn PipelineObserver,
    ) -> PipelineRun {
        let scratch = match create_scratch_dir(scratch_root, target) {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "Failed to create scratch directory");
                return PipelineRun::aborted(PipelinePhase::NotStarted, e.to_string());
            }
        };

        let run = self
            .run(Some(target), scratch.path(), destination, verbose, observer)
            .await;

        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
        run
    }

    /// Transfer only: deliver the files already present in `<output_dir>/<target>/`
    #[instrument(skip(self), fields(output_dir = %output_dir.display()))]
    pub async fn upload(
        &self,
        target: &str,
        output_dir: &Path,
        destination: &Destination,
    ) -> PipelineRun {
        if let Err(e) = self.extractor.ensure_configured(target) {
            warn!(error = %e, "Upload requested for unknown target");
            return PipelineRun::aborted(PipelinePhase::NotStarted, e.to_string());
        }

        let transfer = self
            .transfer(&[target.to_string()], output_dir, destination)
            .await;
        PipelineRun {
            success: transfer.success,
            phase: PipelinePhase::Done,
            extraction: None,
            transfer: Some(transfer),
            error: None,
            note: None,
        }
    }

    fn finish_without_transfer(&self, extraction: ExtractionReport, note: &str) -> PipelineRun {
        PipelineRun {
            success: extraction.successful > 0,
            phase: PipelinePhase::SkippedTransfer,
            extraction: Some(extraction),
            transfer: None,
            error: None,
            note: Some(note.to_string()),
        }
    }

    /// One client for the whole phase, disconnected on every path
    async fn transfer(
        &self,
        targets: &[String],
        output_dir: &Path,
        destination: &Destination,
    ) -> TransferReport {
        let mut client = match self.transfers.create(destination) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to create transfer client");
                return TransferReport::failed(e.to_string());
            }
        };

        let report = self
            .transfer_with(client.as_mut(), targets, output_dir, destination)
            .await;
        client.disconnect().await;
        report
    }

    async fn transfer_with(
        &self,
        client: &mut dyn TransferClient,
        targets: &[String],
        output_dir: &Path,
        destination: &Destination,
    ) -> TransferReport {
        if !client.connect().await {
            return TransferReport::failed(format!("{} connection failed", client.backend()));
        }

        let extension = self.extractor.file_extension().to_string();
        let mut report = TransferReport::new();
        for target in targets {
            let files = match list_files(&output_dir.join(target), &extension).await {
                Ok(files) => files,
                Err(e) => {
                    error!(target = %target, error = %e, "Failed to list extracted files");
                    report.errors.push(format!("{}: {}", target, e));
                    report.success = false;
                    continue;
                }
            };
            if files.is_empty() {
                warn!(target = %target, "No files to transfer");
            }

            let name = destination.name_for(target);
            let outcome = client.put_and_verify(&name, &files).await;
            report.absorb(target, outcome);
        }
        report
    }
}

fn create_scratch_dir(root: &Path, target: &str) -> Result<tempfile::TempDir, PipelineError> {
    std::fs::create_dir_all(root)?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("extract-{}-", target))
        .tempdir_in(root)?;
    Ok(dir)
}

/// Files with `extension` directly inside `dir`, sorted by name
async fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        PipelineError::Fatal(format!("Cannot read directory {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

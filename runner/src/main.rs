// One-shot pipeline runner: extract every target, deliver over SFTP or webhook, exit
//
// Exits non-zero when extraction aborted or no file could be delivered.

use anyhow::Result;
use common::bootstrap;
use common::config::Settings;
use common::models::{ExtractionReport, TransferReport};
use common::orchestrator::{NoopObserver, PipelineRun};
use common::telemetry;
use common::transfer::Destination;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let settings = bootstrap::load_settings()?;
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;

    let started = Instant::now();
    info!(
        targets = settings.extraction.targets.len(),
        output_dir = %settings.extraction.output_dir.display(),
        "Starting one-shot pipeline"
    );

    let orchestrator = bootstrap::init_orchestrator(&settings)?;
    let destination = delivery_for(&settings);
    if !destination.is_enabled() {
        warn!("No SFTP or webhook section configured, files stay local");
    }

    let run = orchestrator
        .run(
            None,
            &settings.extraction.output_dir,
            &destination,
            true,
            &NoopObserver,
        )
        .await;

    log_summary(&run);
    let elapsed = started.elapsed().as_secs_f64();

    if overall_success(&run) {
        info!(elapsed_seconds = elapsed, "Pipeline completed successfully");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(elapsed_seconds = elapsed, "Pipeline completed with problems");
        Ok(ExitCode::FAILURE)
    }
}

/// SFTP when configured, otherwise the webhook, otherwise extraction only
fn delivery_for(settings: &Settings) -> Destination {
    if settings.sftp.is_some() {
        Destination::Sftp {
            category: settings.extraction.category.clone(),
        }
    } else if settings.webhook.is_some() {
        Destination::Webhook
    } else {
        Destination::Disabled
    }
}

/// Extraction ran, and if a transfer happened at least one file arrived
fn overall_success(run: &PipelineRun) -> bool {
    let extracted = run.extraction.as_ref().is_some_and(|e| e.success);
    let delivered = run
        .transfer
        .as_ref()
        .map_or(true, |t| t.successful_uploads > 0);
    extracted && delivered && run.error.is_none()
}

fn log_summary(run: &PipelineRun) {
    match &run.extraction {
        Some(report) => log_extraction(report),
        None => error!(error = ?run.error, "Extraction did not run"),
    }
    if let Some(note) = &run.note {
        info!(note = %note, "Transfer skipped");
    }
    if let Some(report) = &run.transfer {
        log_transfer(report);
    }
}

fn log_extraction(report: &ExtractionReport) {
    if !report.success {
        error!(
            error = report.error.as_deref().unwrap_or("Unknown error"),
            "Extraction failed"
        );
        return;
    }
    info!(
        successful = report.successful,
        failed = report.failed,
        total = report.total_executions,
        total_time = report.total_time,
        "Extraction summary"
    );
    for e in &report.errors {
        warn!(error = %e, "Extraction error");
    }
}

fn log_transfer(report: &TransferReport) {
    if report.success {
        info!(
            successful_uploads = report.successful_uploads,
            total_uploads = report.total_uploads,
            targets = ?report.targets_processed,
            "Transfer summary"
        );
    } else {
        warn!(
            successful_uploads = report.successful_uploads,
            failed_uploads = report.failed_uploads,
            total_uploads = report.total_uploads,
            error = ?report.error,
            "Transfer partially failed"
        );
    }
    for e in &report.errors {
        warn!(error = %e, "Upload error");
    }
}

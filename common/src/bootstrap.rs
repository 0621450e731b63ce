// Bootstrap utilities shared by the api and runner binaries

use crate::config::Settings;
use crate::database::{create_query_runner, QueryRunner};
use crate::extractor::Extractor;
use crate::jobs::{JobRegistry, JobRunner};
use crate::orchestrator::PipelineOrchestrator;
use crate::query_source::QuerySource;
use crate::table_writer::{ParquetTableWriter, TableWriter};
use crate::transfer::{ConfiguredTransfers, TransferClientFactory};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Load settings from `config/` and the environment, then validate them
///
/// # Errors
/// Returns error if loading fails or a required value (such as database
/// credentials) is missing
pub fn load_settings() -> Result<Settings> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(settings)
}

/// Build the extractor from the query directory and database settings
///
/// # Errors
/// Returns error if the query directory is missing or database credentials
/// are absent
#[tracing::instrument(skip(settings))]
pub fn init_extractor(settings: &Settings) -> Result<Extractor> {
    let runner: Arc<dyn QueryRunner> =
        create_query_runner(&settings.database).context("Failed to create query runner")?;
    let writer: Arc<dyn TableWriter> = Arc::new(ParquetTableWriter::from_codec_name(
        &settings.extraction.compression,
    ));
    let source = QuerySource::from_config(&settings.extraction);

    let extractor = Extractor::from_source(&source, runner, writer)
        .context("Failed to load query definitions")?;
    info!(
        targets = extractor.targets().len(),
        queries = extractor.queries().len(),
        "Extractor initialized"
    );
    Ok(extractor)
}

/// Build the orchestrator with transfer clients from settings
///
/// # Errors
/// Returns error if the extractor cannot be built
pub fn init_orchestrator(settings: &Settings) -> Result<Arc<PipelineOrchestrator>> {
    let extractor = Arc::new(init_extractor(settings)?);
    let transfers: Arc<dyn TransferClientFactory> = Arc::new(
        ConfiguredTransfers::new(settings.sftp.clone(), settings.object_storage.clone())
            .with_webhook(settings.webhook.clone()),
    );
    Ok(Arc::new(PipelineOrchestrator::new(extractor, transfers)))
}

/// Build the job registry and runner
///
/// # Errors
/// Returns error if the orchestrator cannot be built
pub fn init_job_runner(settings: &Settings) -> Result<JobRunner> {
    let orchestrator = init_orchestrator(settings)?;
    let registry = JobRegistry::with_retention(settings.jobs.max_retained);
    info!(max_retained = ?settings.jobs.max_retained, "Job registry initialized");
    Ok(JobRunner::new(
        registry,
        orchestrator,
        settings.extraction.scratch_dir.clone(),
    ))
}

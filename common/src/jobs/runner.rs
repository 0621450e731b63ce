// Background job execution

use super::registry::JobRegistry;
use crate::models::{ExtractionReport, Job, JobKind, JobRequest, TransferReport};
use crate::orchestrator::{PipelineObserver, PipelineOrchestrator, PipelineRun};
use crate::telemetry;
use crate::transfer::Destination;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Submits jobs and runs each one on its own task
#[derive(Clone)]
pub struct JobRunner {
    registry: JobRegistry,
    orchestrator: Arc<PipelineOrchestrator>,
    scratch_root: PathBuf,
}

impl JobRunner {
    pub fn new(
        registry: JobRegistry,
        orchestrator: Arc<PipelineOrchestrator>,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register the job as pending and start it in the background.
    ///
    /// Returns as soon as the job is registered.
    #[instrument(skip(self, request), fields(kind = %request.kind))]
    pub fn submit(&self, request: JobRequest) -> Job {
        let job = self.registry.create(request);
        let runner = self.clone();
        let job_id = job.job_id;
        let span = tracing::info_span!("job", job_id = %job_id);
        tokio::spawn(async move { runner.execute(job_id).await }.instrument(span));
        job
    }

    async fn execute(&self, job_id: Uuid) {
        let job = match self.registry.get(&job_id) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Submitted job disappeared before it started");
                return;
            }
        };
        if let Err(e) = self.registry.mark_running(&job_id) {
            error!(error = %e, "Failed to mark job running");
            return;
        }
        info!(kind = %job.kind, "Job started");
        let started = Instant::now();

        // A panic inside the pipeline surfaces as a JoinError, not a dead runner
        let work = {
            let orchestrator = Arc::clone(&self.orchestrator);
            let observer = RegistryObserver {
                registry: self.registry.clone(),
                job_id,
            };
            let scratch_root = self.scratch_root.clone();
            let request = job.request.clone();
            tokio::spawn(
                async move { dispatch(&orchestrator, &request, &scratch_root, &observer).await }
                    .in_current_span(),
            )
        };

        let kind = job.kind.to_string();
        match work.await {
            Ok(run) => match self.registry.finish(&job_id, run) {
                Ok(status) => {
                    info!(status = %status, "Job finished");
                    telemetry::record_job_finished(
                        &kind,
                        &status.to_string(),
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => error!(error = %e, "Failed to store job result"),
            },
            Err(e) => {
                error!(error = %e, "Job task aborted");
                if let Err(e) = self
                    .registry
                    .fail(&job_id, format!("Job execution aborted: {}", e))
                {
                    error!(error = %e, "Failed to mark job failed");
                }
                telemetry::record_job_finished(&kind, "failed", started.elapsed().as_secs_f64());
            }
        }
    }
}

async fn dispatch(
    orchestrator: &PipelineOrchestrator,
    request: &JobRequest,
    scratch_root: &std::path::Path,
    observer: &RegistryObserver,
) -> PipelineRun {
    let target = request.target.as_deref();
    match (request.kind, target) {
        (JobKind::Pipeline, _) => {
            let destination = if request.transfer_enabled {
                Destination::Sftp {
                    category: request.category.clone(),
                }
            } else {
                Destination::Disabled
            };
            orchestrator
                .run(None, &request.output_dir, &destination, request.verbose, observer)
                .await
        }
        (JobKind::TargetPipeline, Some(target)) => {
            let destination = if request.transfer_enabled {
                Destination::Sftp {
                    category: request.category.clone(),
                }
            } else {
                Destination::Disabled
            };
            orchestrator
                .run(
                    Some(target),
                    &request.output_dir,
                    &destination,
                    request.verbose,
                    observer,
                )
                .await
        }
        (JobKind::Upload, Some(target)) => {
            let destination = Destination::ObjectStorage {
                bucket: request.destination_name.clone(),
            };
            orchestrator
                .upload(target, &request.output_dir, &destination)
                .await
        }
        (JobKind::StoragePipeline, Some(target)) => {
            let destination = Destination::ObjectStorage {
                bucket: request.destination_name.clone(),
            };
            let scratch = request.scratch_dir.as_deref().unwrap_or(scratch_root);
            orchestrator
                .run_with_scratch(target, scratch, &destination, request.verbose, observer)
                .await
        }
        (kind, None) => {
            warn!(kind = %kind, "Job submitted without a target");
            PipelineRun {
                success: false,
                phase: crate::orchestrator::PipelinePhase::NotStarted,
                extraction: None,
                transfer: None,
                error: Some(format!("Job kind {} requires a target", kind)),
                note: None,
            }
        }
    }
}

/// Publishes phase reports to the registry as soon as they exist
struct RegistryObserver {
    registry: JobRegistry,
    job_id: Uuid,
}

impl PipelineObserver for RegistryObserver {
    fn on_extraction(&self, report: &ExtractionReport) {
        if let Err(e) = self.registry.record_extraction(&self.job_id, report) {
            warn!(error = %e, "Failed to record extraction report");
        }
    }

    fn on_transfer(&self, report: &TransferReport) {
        if let Err(e) = self.registry.record_transfer(&self.job_id, report) {
            warn!(error = %e, "Failed to record transfer report");
        }
    }
}

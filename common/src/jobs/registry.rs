// In-process job registry

use crate::errors::JobError;
use crate::models::{ExtractionReport, Job, JobRequest, JobStatus, JobSummary, TransferReport};
use crate::orchestrator::PipelineRun;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Shared map of job id to job record.
///
/// Cloning the registry clones the handle, not the jobs. State lives only as
/// long as the process.
#[derive(Clone, Debug, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    max_retained: Option<usize>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that evicts the oldest finished jobs beyond `max_retained`
    pub fn with_retention(max_retained: Option<usize>) -> Self {
        Self {
            jobs: Arc::default(),
            max_retained,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Job>> {
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new pending job
    pub fn create(&self, request: JobRequest) -> Job {
        let job = Job::new(request);
        let mut jobs = self.write();
        jobs.insert(job.job_id, job.clone());
        self.evict(&mut jobs);
        info!(job_id = %job.job_id, kind = %job.kind, "Job created");
        job
    }

    pub fn get(&self, job_id: &Uuid) -> Result<Job, JobError> {
        self.read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Every retained job, newest first
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self.read().values().map(Job::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn mark_running(&self, job_id: &Uuid) -> Result<(), JobError> {
        self.update(job_id, |job| {
            transition(job, JobStatus::Running)?;
            job.started_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Publish the extraction report while the job is still running
    pub fn record_extraction(
        &self,
        job_id: &Uuid,
        report: &ExtractionReport,
    ) -> Result<(), JobError> {
        self.update(job_id, |job| {
            if job.extraction.is_none() {
                job.extraction = Some(report.clone());
            }
            Ok(())
        })
    }

    /// Publish the transfer report while the job is still running
    pub fn record_transfer(&self, job_id: &Uuid, report: &TransferReport) -> Result<(), JobError> {
        self.update(job_id, |job| {
            if job.transfer.is_none() {
                job.transfer = Some(report.clone());
            }
            Ok(())
        })
    }

    /// Store the final run result; the job fails iff the run carries an error
    pub fn finish(&self, job_id: &Uuid, run: PipelineRun) -> Result<JobStatus, JobError> {
        let status = if run.error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        self.update(job_id, |job| {
            transition(job, status)?;
            job.completed_at = Some(Utc::now());
            // Reports already published through record_* are never replaced
            if job.extraction.is_none() {
                job.extraction = run.extraction;
            }
            if job.transfer.is_none() {
                job.transfer = run.transfer;
            }
            job.error = run.error;
            job.note = run.note;
            Ok(())
        })?;
        Ok(status)
    }

    /// Mark the job failed, keeping any partial results already recorded
    pub fn fail(&self, job_id: &Uuid, error: impl Into<String>) -> Result<(), JobError> {
        let error = error.into();
        self.update(job_id, |job| {
            transition(job, JobStatus::Failed)?;
            job.completed_at = Some(Utc::now());
            job.error = Some(error);
            Ok(())
        })
    }

    fn update<F>(&self, job_id: &Uuid, apply: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        apply(job)?;
        let terminal = job.status.is_terminal();
        if terminal {
            self.evict(&mut jobs);
        }
        Ok(())
    }

    // Only finished jobs are evicted, oldest first
    fn evict(&self, jobs: &mut HashMap<Uuid, Job>) {
        let Some(max) = self.max_retained else {
            return;
        };
        if jobs.len() <= max {
            return;
        }

        let mut finished: Vec<(chrono::DateTime<Utc>, Uuid)> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.created_at, job.job_id))
            .collect();
        finished.sort();

        let excess = jobs.len() - max;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
            debug!(job_id = %job_id, "Evicted finished job");
        }
    }
}

fn transition(job: &mut Job, next: JobStatus) -> Result<(), JobError> {
    if !job.status.can_transition_to(next) {
        return Err(JobError::InvalidTransition {
            job_id: job.job_id.to_string(),
            from: job.status.to_string(),
            to: next.to_string(),
        });
    }
    job.status = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::PipelinePhase;

    fn run(error: Option<&str>) -> PipelineRun {
        PipelineRun {
            success: error.is_none(),
            phase: PipelinePhase::Done,
            extraction: Some(ExtractionReport::new(None)),
            transfer: None,
            error: error.map(str::to_string),
            note: None,
        }
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        assert_eq!(registry.get(&id), Err(JobError::NotFound(id.to_string())));
    }

    #[test]
    fn test_lifecycle_and_no_regression() {
        let registry = JobRegistry::new();
        let job = registry.create(JobRequest::pipeline("data", "data"));
        assert_eq!(job.status, JobStatus::Pending);

        registry.mark_running(&job.job_id).expect("running");
        let status = registry.finish(&job.job_id, run(None)).expect("finish");
        assert_eq!(status, JobStatus::Completed);

        let stored = registry.get(&job.job_id).expect("get");
        assert!(stored.completed_at.is_some());
        assert!(stored.extraction.is_some());

        assert!(matches!(
            registry.mark_running(&job.job_id),
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(registry.fail(&job.job_id, "late").is_err());
        assert_eq!(
            registry.get(&job.job_id).expect("get").status,
            JobStatus::Completed
        );
    }

    #[test]
    fn test_finish_keeps_recorded_reports() {
        let registry = JobRegistry::new();
        let job = registry.create(JobRequest::pipeline("data", "data"));
        registry.mark_running(&job.job_id).expect("running");

        let recorded = ExtractionReport::new(Some("DB1".to_string()));
        let mut transfer = TransferReport::new();
        transfer.successful_uploads = 2;
        registry
            .record_extraction(&job.job_id, &recorded)
            .expect("record extraction");
        registry
            .record_transfer(&job.job_id, &transfer)
            .expect("record transfer");

        let mut final_run = run(None);
        final_run.transfer = Some(TransferReport::new());
        registry.finish(&job.job_id, final_run).expect("finish");

        let stored = registry.get(&job.job_id).expect("get");
        assert_eq!(stored.extraction, Some(recorded));
        assert_eq!(stored.transfer, Some(transfer));
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[test]
    fn test_run_error_fails_job() {
        let registry = JobRegistry::new();
        let job = registry.create(JobRequest::pipeline("data", "data"));
        registry.mark_running(&job.job_id).expect("running");

        let status = registry
            .finish(&job.job_id, run(Some("Database 'DB3' not configured")))
            .expect("finish");
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(
            registry.get(&job.job_id).expect("get").error.as_deref(),
            Some("Database 'DB3' not configured")
        );
    }

    #[test]
    fn test_list_is_newest_first() {
        let registry = JobRegistry::new();
        let first = registry.create(JobRequest::pipeline("data", "data"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = registry.create(JobRequest::pipeline("data", "data"));

        let ids: Vec<Uuid> = registry.list().iter().map(|s| s.job_id).collect();
        assert_eq!(ids, vec![second.job_id, first.job_id]);
    }

    #[test]
    fn test_retention_never_evicts_active_jobs() {
        let registry = JobRegistry::with_retention(Some(1));
        let done = registry.create(JobRequest::pipeline("data", "data"));
        registry.mark_running(&done.job_id).expect("running");
        registry.finish(&done.job_id, run(None)).expect("finish");

        let active = registry.create(JobRequest::pipeline("data", "data"));
        let pending = registry.create(JobRequest::pipeline("data", "data"));

        assert!(registry.get(&done.job_id).is_err());
        assert!(registry.get(&active.job_id).is_ok());
        assert!(registry.get(&pending.job_id).is_ok());
        assert_eq!(registry.len(), 2);
    }
}

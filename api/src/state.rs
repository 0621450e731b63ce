use std::sync::Arc;

use common::config::Settings;
use common::jobs::{JobRegistry, JobRunner};
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
    pub config: Arc<Settings>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(runner: JobRunner, config: Settings, metrics_handle: PrometheusHandle) -> Self {
        Self {
            runner,
            config: Arc::new(config),
            metrics_handle,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        self.runner.registry()
    }
}

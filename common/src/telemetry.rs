// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence over `log_level`. With `json` set every event
/// is emitted as one JSON object carrying the current span context.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer().with_target(false).with_filter(env_filter).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus recorder and describe the pipeline metrics.
///
/// The returned handle renders the exposition text for `/metrics`.
#[tracing::instrument(skip_all)]
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!("pipeline_jobs_total", "Jobs finished, by kind and status");
    describe_counter!(
        "pipeline_queries_total",
        "Query executions, by outcome"
    );
    describe_counter!(
        "pipeline_uploads_total",
        "File uploads, by transfer backend and outcome"
    );
    describe_histogram!(
        "pipeline_job_duration_seconds",
        "Duration of jobs in seconds"
    );

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Count one finished (target, query) execution
#[inline]
pub fn record_query_outcome(success: bool) {
    counter!("pipeline_queries_total", "outcome" => outcome_label(success)).increment(1);
}

/// Count one file upload attempt
#[inline]
pub fn record_upload_outcome(backend: &'static str, success: bool) {
    counter!(
        "pipeline_uploads_total",
        "backend" => backend,
        "outcome" => outcome_label(success)
    )
    .increment(1);
}

/// Count a finished job and record its duration
#[inline]
pub fn record_job_finished(kind: &str, status: &str, duration_seconds: f64) {
    counter!(
        "pipeline_jobs_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("pipeline_job_duration_seconds", "kind" => kind.to_string()).record(duration_seconds);
}

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::health::index))
        .route("/health", get(handlers::health::health_check))
        .route("/run-pipeline", post(handlers::pipeline::run_pipeline))
        .route(
            "/run-pipeline/:target",
            post(handlers::pipeline::run_target_pipeline),
        )
        .route("/upload/:target", post(handlers::pipeline::upload_target))
        .route(
            "/run-storage-pipeline/:target",
            post(handlers::pipeline::run_storage_pipeline),
        )
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/:job_id", get(handlers::jobs::get_job))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

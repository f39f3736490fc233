use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{MetricsAggregator, StatusRegistry};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::jobs::JobScheduler;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{health, jobs, metrics};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<JobScheduler>,
    pub status: Arc<StatusRegistry>,
    pub metrics: Arc<MetricsAggregator>,
}

pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    // Probes and metrics
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::job_metrics))
        .route("/metrics/prometheus", get(metrics_handler));

    let job_routes = Router::new()
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/:name", get(jobs::get_job))
        .route("/api/v1/jobs/:name/run", post(jobs::run_job));

    Router::new()
        .merge(public_routes)
        .merge(job_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .with_state(state)
}

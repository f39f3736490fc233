//! Prometheus metrics.
//!
//! HTTP request metrics middleware, job run recorders, and the Prometheus
//! text export.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let method_str = method_to_str(&method);

    counter!(
        "http_requests_total",
        "method" => method_str.to_string(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method_str.to_string(),
        "path" => path
    )
    .record(duration);

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// Record one finished backup run.
pub fn record_job_run(job: &str, success: bool, duration: Duration, bytes: Option<u64>) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "backup_job_runs_total",
        "job" => job.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!("backup_job_duration_seconds", "job" => job.to_string())
        .record(duration.as_secs_f64());

    if let Some(bytes) = bytes {
        counter!("backup_bytes_written_total", "job" => job.to_string()).increment(bytes);
    }
}

/// Record a tick dropped because the previous run was still active.
pub fn record_skipped_tick(job: &str) {
    counter!("backup_job_skipped_ticks_total", "job" => job.to_string()).increment(1);
}

/// Track how many runs are currently executing.
pub fn record_active_runs(active: usize) {
    gauge!("backup_job_active_runs").set(active as f64);
}

/// Handler for /metrics/prometheus that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        let output = handle.render();
        (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
    } else {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            [(axum::http::header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        )
    }
}

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the Prometheus metrics recorder.
///
/// Installs the global recorder on first call; later calls are no-ops.
/// Backup runs take seconds to hours, so the histogram buckets span both
/// HTTP latencies and long job durations.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    // Only one caller may install the global recorder.
    let _install = INSTALL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(&[
            0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 10800.0,
        ])?
        .install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

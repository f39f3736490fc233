//! Per-job run metrics.

use axum::{extract::State, Json};
use domain::models::JobMetrics;
use std::collections::BTreeMap;

use crate::app::AppState;

/// JSON snapshot of every job's run metrics, keyed by job name.
///
/// Prometheus text exposition lives at `/metrics/prometheus`.
pub async fn job_metrics(State(state): State<AppState>) -> Json<BTreeMap<String, JobMetrics>> {
    Json(state.metrics.snapshot_all().into_iter().collect())
}

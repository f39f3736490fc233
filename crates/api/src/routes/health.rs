//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::JobRunState;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app::AppState;

/// Simple status response for liveness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Health check endpoint.
///
/// Returns the state of the scheduler and every job. The service is healthy
/// while the scheduler runs and no job's latest run failed; otherwise the
/// same body is returned with 503.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<BTreeMap<String, JobRunState>>) {
    let snapshot: BTreeMap<String, JobRunState> = state.status.snapshot().into_iter().collect();

    let code = if state.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

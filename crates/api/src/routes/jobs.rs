//! Job inspection and manual run endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use domain::models::{BackupKind, JobMetrics, JobRunState, RetentionPolicy};
use serde::Serialize;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::jobs::RunOutcome;

/// One job as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub name: String,
    pub kind: BackupKind,
    pub schedule: String,
    pub retention: RetentionPolicy,
    pub state: Option<JobRunState>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub running: bool,
    pub metrics: Option<JobMetrics>,
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub job: String,
    pub status: String,
}

fn describe_job(state: &AppState, name: &str) -> Option<JobResponse> {
    let spec = state.scheduler.job_spec(name)?;
    let entry = state.status.entry(name);

    Some(JobResponse {
        name: spec.name,
        kind: spec.kind,
        schedule: spec.schedule,
        retention: spec.retention,
        state: entry.as_ref().map(|e| e.state),
        updated_at: entry.as_ref().map(|e| e.updated_at),
        message: entry.and_then(|e| e.message),
        next_run: state.scheduler.next_run(name),
        running: state.scheduler.is_running(name).unwrap_or(false),
        metrics: state.metrics.snapshot(name),
    })
}

/// List every registered job.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobResponse>> {
    let jobs = state
        .scheduler
        .job_names()
        .iter()
        .filter_map(|name| describe_job(&state, name))
        .collect();
    Json(jobs)
}

/// Get one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    describe_job(&state, &name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job '{name}' not found")))
}

/// Start a run of a job outside its schedule.
///
/// Returns 202 when the run started and 409 when one is already active.
pub async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    match state.scheduler.trigger(&name)? {
        RunOutcome::Started => {
            info!(job = %name, "Manual run started via API");
            Ok((
                StatusCode::ACCEPTED,
                Json(RunAccepted {
                    job: name,
                    status: "started".to_string(),
                }),
            ))
        }
        RunOutcome::AlreadyRunning => {
            Err(ApiError::Conflict(format!("Job '{name}' is already running")))
        }
        RunOutcome::ShuttingDown => Err(ApiError::ServiceUnavailable(
            "Scheduler is shutting down".to_string(),
        )),
    }
}

//! Per-job metrics aggregation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::listener::{JobTransition, RunSummary, TransitionListener};
use crate::models::JobMetrics;

/// Accumulates [`JobMetrics`] for every job that has finished a run.
///
/// A record is atomic with respect to snapshots: readers never see a run
/// counted in `total_runs` but not yet in `successful_runs`/`failed_runs`.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    jobs: Mutex<HashMap<String, JobMetrics>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished run, creating the job's entry on first use.
    pub fn record(
        &self,
        job: &str,
        success: bool,
        duration: Duration,
        bytes_written: Option<u64>,
        finished_at: DateTime<Utc>,
    ) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.entry(job.to_string())
            .or_default()
            .record(success, duration, bytes_written, finished_at);
    }

    /// Copy of one job's metrics, `None` if it never ran.
    pub fn snapshot(&self, job: &str) -> Option<JobMetrics> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(job).cloned()
    }

    pub fn snapshot_all(&self) -> HashMap<String, JobMetrics> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.clone()
    }
}

impl TransitionListener for MetricsAggregator {
    fn on_transition(&self, _transition: &JobTransition) {}

    fn on_run_complete(&self, summary: &RunSummary) {
        let finished_at = chrono::Duration::from_std(summary.duration)
            .ok()
            .and_then(|d| summary.started_at.checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        self.record(
            &summary.job,
            summary.success,
            summary.duration,
            summary.bytes_written,
            finished_at,
        );
    }
}

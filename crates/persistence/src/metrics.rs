//! Storage metrics collection.
//!
//! Provides functions for recording backup-store metrics.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::retention::RetentionReport;

/// Record the outcome of one retention pass.
pub fn record_retention(job: &str, report: &RetentionReport) {
    counter!("backup_retention_deleted_total", "job" => job.to_string())
        .increment(report.deleted.len() as u64);
    counter!("backup_retention_failed_total", "job" => job.to_string())
        .increment(report.failed.len() as u64);
    gauge!("backup_artifacts_retained", "job" => job.to_string()).set(report.retained as f64);
}

/// Record the size of the artifact a run produced.
pub fn record_artifact_size(job: &str, bytes: u64) {
    gauge!("backup_last_artifact_bytes", "job" => job.to_string()).set(bytes as f64);
}

/// A helper to time storage operations and record metrics.
///
/// Usage:
/// ```ignore
/// let timer = StorageTimer::new("retention");
/// let report = engine.apply(&dir, &policy)?;
/// timer.record();
/// ```
pub struct StorageTimer {
    operation: String,
    start: Instant,
}

impl StorageTimer {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        histogram!(
            "backup_storage_operation_duration_seconds",
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

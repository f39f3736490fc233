//! Retention enforcement for job backup directories.
//!
//! The engine holds no state: artifacts are discovered by scanning the job
//! directory on every pass, so a pass is idempotent once the directory
//! satisfies the policy.

use chrono::{DateTime, Utc};
use domain::errors::RetentionError;
use domain::models::RetentionPolicy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::storage::list_artifacts;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Matching artifacts found in the directory.
    pub scanned: usize,
    /// Artifacts left in place, including those that failed to delete.
    pub retained: usize,
    pub deleted: Vec<PathBuf>,
    /// Artifacts selected for deletion that could not be removed.
    pub failed: Vec<PathBuf>,
}

/// Deletes backup artifacts that fall outside a job's retention policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionEngine;

impl RetentionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply `policy` to `job_dir` as of now.
    pub fn apply(
        &self,
        job_dir: &Path,
        policy: &RetentionPolicy,
    ) -> Result<RetentionReport, RetentionError> {
        self.apply_at(job_dir, policy, Utc::now())
    }

    /// Apply `policy` to `job_dir` as of `now`.
    ///
    /// A missing directory is not an error. Individual deletion failures are
    /// logged and reported in [`RetentionReport::failed`]; only failing to
    /// list the directory aborts the pass.
    pub fn apply_at(
        &self,
        job_dir: &Path,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, RetentionError> {
        let job = job_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let artifacts = match list_artifacts(job_dir) {
            Ok(artifacts) => artifacts,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(job = %job, dir = %job_dir.display(), "No backup directory, nothing to retain");
                return Ok(RetentionReport::default());
            }
            Err(source) => {
                return Err(RetentionError::ListDirectory {
                    path: job_dir.to_path_buf(),
                    source,
                })
            }
        };

        let expired = policy.expired(&artifacts, now);
        let mut report = RetentionReport {
            scanned: artifacts.len(),
            retained: artifacts.len() - expired.len(),
            ..Default::default()
        };

        for artifact in expired {
            let result = if artifact.path.is_dir() {
                fs::remove_dir_all(&artifact.path)
            } else {
                fs::remove_file(&artifact.path)
            };

            match result {
                Ok(()) => {
                    info!(
                        job = %job,
                        artifact = %artifact.name,
                        modified = %artifact.modified,
                        "Deleted expired backup"
                    );
                    report.deleted.push(artifact.path.clone());
                }
                Err(e) => {
                    warn!(
                        job = %job,
                        artifact = %artifact.path.display(),
                        error = %e,
                        "Failed to delete expired backup"
                    );
                    report.retained += 1;
                    report.failed.push(artifact.path.clone());
                }
            }
        }

        info!(
            job = %job,
            policy = policy.kind(),
            value = policy.value(),
            scanned = report.scanned,
            deleted = report.deleted.len(),
            retained = report.retained,
            "Retention policy applied"
        );

        crate::metrics::record_retention(&job, &report);

        Ok(report)
    }
}

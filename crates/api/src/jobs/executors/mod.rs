//! Concrete backup executors.
//!
//! Every executor shells out to the vendor dump tool through
//! `tokio::process`, with the child killed if the run is cancelled or its
//! future dropped.

mod minio;
mod mysql;
mod postgres;

pub use minio::MinioExecutor;
pub use mysql::MysqlExecutor;
pub use postgres::PostgresExecutor;

use domain::errors::ExecutionError;
use domain::models::BackupKind;
use domain::services::BackupExecutor;
use persistence::{LocalStorage, StorageError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::JobConfig;

/// Errors raised while building an executor from configuration.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("job '{job}' is missing its {kind} configuration")]
    MissingConfig { job: String, kind: BackupKind },

    #[error("job '{job}' has an invalid connection string: {reason}")]
    InvalidConnectionString { job: String, reason: String },

    #[error("job '{job}': unsupported job type '{kind}'")]
    UnsupportedKind { job: String, kind: String },
}

/// Build the executor for a configured job.
pub fn create_executor(
    job: &JobConfig,
    storage: &LocalStorage,
) -> Result<Arc<dyn BackupExecutor>, ExecutorError> {
    let kind = job
        .backup_kind()
        .map_err(|_| ExecutorError::UnsupportedKind {
            job: job.name.clone(),
            kind: job.kind.clone(),
        })?;

    let missing = || ExecutorError::MissingConfig {
        job: job.name.clone(),
        kind,
    };

    let executor: Arc<dyn BackupExecutor> = match kind {
        BackupKind::Postgres => Arc::new(PostgresExecutor::new(
            &job.name,
            job.postgres_config.clone().ok_or_else(missing)?,
            storage.clone(),
        )),
        BackupKind::Mysql => Arc::new(MysqlExecutor::new(
            &job.name,
            job.mysql_config.as_ref().ok_or_else(missing)?,
            storage.clone(),
        )?),
        BackupKind::Minio => Arc::new(MinioExecutor::new(
            &job.name,
            job.minio_config.clone().ok_or_else(missing)?,
            storage.clone(),
        )),
    };
    Ok(executor)
}

fn storage_failure(e: StorageError) -> ExecutionError {
    ExecutionError::Failed(e.to_string())
}

/// Run `command` to completion unless `cancel` fires first.
///
/// Stdout and stderr are captured unless the caller already redirected
/// them. A non-zero exit becomes [`ExecutionError::Failed`] carrying the
/// tail of stderr. With `progress_every` set, a progress line is logged at
/// that interval while the tool runs.
pub(crate) async fn run_tool(
    mut command: Command,
    program: &str,
    cancel: &CancellationToken,
    progress_every: Option<Duration>,
) -> Result<(), ExecutionError> {
    command.stderr(Stdio::piped()).kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        ExecutionError::Failed(format!("failed to start {program}: {e}"))
    })?;

    let started = tokio::time::Instant::now();
    let period = progress_every.unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval_at(started + period, period);

    let output = child.wait_with_output();
    tokio::pin!(output);

    let output = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(program, "Cancelling backup tool");
                return Err(ExecutionError::Cancelled);
            }
            result = &mut output => break result?,
            _ = ticker.tick(), if progress_every.is_some() => {
                info!(
                    program,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Backup still in progress"
                );
            }
        }
    };

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    let message = if detail.is_empty() {
        format!("{program} failed: {}", output.status)
    } else {
        format!("{program} failed: {}: {}", output.status, tail(detail, 512))
    };
    Err(ExecutionError::Failed(message))
}

/// Removes a half-written artifact unless the run that owns it succeeded.
///
/// Cleanup happens on drop, so output is removed even when the executor
/// future is dropped mid-run.
pub(crate) struct PartialArtifact {
    path: PathBuf,
    keep: bool,
}

impl PartialArtifact {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    /// Mark the artifact complete.
    pub(crate) fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let result = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        match result {
            Ok(()) => info!(path = %self.path.display(), "Removed partial backup"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial backup"),
        }
    }
}

/// Run `command` with stdout redirected into a new file at `output`.
///
/// The file is removed again when the run fails or is dropped before
/// finishing. Returns the size of the written file.
pub(crate) async fn run_tool_to_file(
    mut command: Command,
    program: &str,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<u64, ExecutionError> {
    let file = tokio::fs::File::create(output).await?;
    let partial = PartialArtifact::new(output);
    command.stdout(file.into_std().await);

    run_tool(command, program, cancel, None).await?;
    let bytes = tokio::fs::metadata(output).await?.len();
    partial.keep();
    Ok(bytes)
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

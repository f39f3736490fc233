//! Domain error types.
//!
//! Configuration problems (`InvalidSchedule`, `DuplicateJob`) are fatal to the
//! registration of one job only. Execution and retention failures are surfaced
//! through status and metrics and never stop the scheduler.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing a job schedule.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, found {0}")]
    InvalidFieldCount(usize),

    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),
}

/// Errors returned by the job scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule '{expression}' for job '{job}': {source}")]
    InvalidSchedule {
        job: String,
        expression: String,
        #[source]
        source: ScheduleError,
    },

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("job '{0}' not found")]
    JobNotFound(String),
}

impl SchedulerError {
    /// Whether this error came from a bad job definition rather than from
    /// the scheduler's lifecycle.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidSchedule { .. } | SchedulerError::DuplicateJob(_)
        )
    }
}

/// Errors produced by a single backup run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("run exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("run cancelled")]
    Cancelled,

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by retention enforcement.
///
/// Failing to delete a single artifact is not an error; only an unreadable
/// backup directory is.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to list backup directory {}: {source}", path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

//! Backup executor contract.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;

/// Result of a successful backup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Path of the produced artifact, when the executor knows it.
    pub artifact: Option<PathBuf>,
    /// Bytes written, when the executor can tell.
    pub bytes_written: Option<u64>,
}

impl ExecutionOutcome {
    pub fn new(artifact: PathBuf, bytes_written: Option<u64>) -> Self {
        Self {
            artifact: Some(artifact),
            bytes_written,
        }
    }
}

/// Performs one backup run for a job.
///
/// Implementations must observe `cancel` and return promptly once it fires.
/// The scheduler enforces a deadline on top of this, but a run that ignores
/// cancellation keeps its resources alive until it finishes on its own.
#[async_trait::async_trait]
pub trait BackupExecutor: Send + Sync {
    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionOutcome, ExecutionError>;

    /// Short label used in logs, e.g. `postgres`.
    fn describe(&self) -> String {
        "backup".to_string()
    }
}

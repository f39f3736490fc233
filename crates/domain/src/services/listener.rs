//! Job state transition subscribers.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::models::JobRunState;

/// A state change of a job, or of the scheduler under
/// [`crate::models::SCHEDULER_STATUS_KEY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub job: String,
    pub state: JobRunState,
    pub timestamp: DateTime<Utc>,
    /// Failure description for `Error` transitions.
    pub message: Option<String>,
}

impl JobTransition {
    pub fn new(job: impl Into<String>, state: JobRunState) -> Self {
        Self {
            job: job.into(),
            state,
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Summary of one finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    pub bytes_written: Option<u64>,
    pub error: Option<String>,
}

/// Receives job transitions from the scheduler.
///
/// Callbacks run on the scheduler's worker tasks and must not block for long.
/// They are invoked without any scheduler lock held.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &JobTransition);

    /// Called once per finished run, before the terminal transition.
    fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Adapts a closure into a [`TransitionListener`].
pub struct FnListener<F>(F);

impl<F> FnListener<F>
where
    F: Fn(&JobTransition) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> TransitionListener for FnListener<F>
where
    F: Fn(&JobTransition) + Send + Sync,
{
    fn on_transition(&self, transition: &JobTransition) {
        (self.0)(transition)
    }
}

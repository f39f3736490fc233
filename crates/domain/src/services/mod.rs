//! Domain services for BackMeUp.
//!
//! Services hold shared state that concurrent job runs write to, and the
//! contracts the scheduler dispatches through.

pub mod executor;
pub mod listener;
pub mod metrics;
pub mod status;

pub use executor::{BackupExecutor, ExecutionOutcome};
pub use listener::{FnListener, JobTransition, RunSummary, TransitionListener};
pub use metrics::MetricsAggregator;
pub use status::{StatusEntry, StatusRegistry};

//! Domain models for BackMeUp.

pub mod artifact;
pub mod job;
pub mod metrics;
pub mod retention;
pub mod schedule;

pub use artifact::BackupArtifact;
pub use job::{ArtifactLayout, BackupKind, JobRunState, JobSpec, SCHEDULER_STATUS_KEY};
pub use metrics::JobMetrics;
pub use retention::RetentionPolicy;
pub use schedule::Cadence;

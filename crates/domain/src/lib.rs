//! Domain layer for BackMeUp.
//!
//! This crate contains:
//! - Domain models (JobSpec, Cadence, RetentionPolicy, BackupArtifact, JobMetrics)
//! - In-memory services shared by concurrent job runs (status, metrics)
//! - The executor and subscriber contracts the scheduler is built against
//! - Domain error types

pub mod errors;
pub mod models;
pub mod services;

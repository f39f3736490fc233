//! Persistence layer for BackMeUp.
//!
//! This crate contains:
//! - The local backup store (per-job directories, artifact naming and discovery)
//! - Retention enforcement over a job directory
//! - Storage-level metrics
//!
//! Backup artifacts live on the local filesystem; there is no database.

pub mod metrics;
pub mod retention;
pub mod storage;

pub use retention::{RetentionEngine, RetentionReport};
pub use storage::{LocalStorage, StorageError};

//! HTTP route handlers.

pub mod health;
pub mod jobs;
pub mod metrics;

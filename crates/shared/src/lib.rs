//! Shared utilities and common types for BackMeUp.
//!
//! This crate provides common functionality used across all other crates:
//! - `${VAR}` environment interpolation for configuration text
//! - Common validation logic
//! - Human-readable byte sizes for log output

pub mod format;
pub mod interpolation;
pub mod validation;

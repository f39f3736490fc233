//! Retention policies and artifact selection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use super::artifact::BackupArtifact;

/// How many backups a job keeps.
///
/// Zero is unrepresentable: a policy always keeps at least one artifact or
/// at least one day of artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep the N most recently modified artifacts.
    Count(NonZeroU32),
    /// Keep artifacts modified within the last N days.
    #[serde(rename = "days")]
    Age(NonZeroU32),
}

impl RetentionPolicy {
    /// Select the artifacts this policy would delete at `now`.
    ///
    /// Count ordering is by modification time, newest first, with ties broken
    /// by name (lexically greater first) so the result is deterministic. Age
    /// expiry is strict: an artifact exactly on the cutoff is kept.
    pub fn expired<'a>(
        &self,
        artifacts: &'a [BackupArtifact],
        now: DateTime<Utc>,
    ) -> Vec<&'a BackupArtifact> {
        match self {
            RetentionPolicy::Count(keep) => {
                let mut ordered: Vec<&BackupArtifact> = artifacts.iter().collect();
                ordered.sort_by(|a, b| {
                    b.modified
                        .cmp(&a.modified)
                        .then_with(|| b.name.cmp(&a.name))
                });
                ordered.into_iter().skip(keep.get() as usize).collect()
            }
            RetentionPolicy::Age(days) => {
                let cutoff = now - Duration::days(i64::from(days.get()));
                artifacts.iter().filter(|a| a.modified < cutoff).collect()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RetentionPolicy::Count(_) => "count",
            RetentionPolicy::Age(_) => "days",
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            RetentionPolicy::Count(n) | RetentionPolicy::Age(n) => n.get(),
        }
    }
}

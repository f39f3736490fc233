//! Backup artifacts found on disk.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::job::BackupKind;

/// A backup output in a job directory: a dump file or a mirrored tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    /// File or directory name, including the kind's prefix.
    pub name: String,
    pub kind: BackupKind,
    pub modified: DateTime<Utc>,
    /// Size in bytes; directories report the size of the entry itself.
    pub size: u64,
}

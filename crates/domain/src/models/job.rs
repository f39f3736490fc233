//! Backup job definitions and run states.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::retention::RetentionPolicy;

/// Status key reserved for the scheduler itself.
pub const SCHEDULER_STATUS_KEY: &str = "scheduler";

/// The kind of data source a job backs up.
///
/// Each kind writes artifacts under a fixed name prefix; retention only ever
/// touches entries carrying one of these prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Postgres,
    Mysql,
    Minio,
}

/// Whether a backup kind produces a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactLayout {
    File,
    Directory,
}

impl BackupKind {
    pub const ALL: [BackupKind; 3] = [BackupKind::Postgres, BackupKind::Mysql, BackupKind::Minio];

    /// Name prefix of artifacts produced by this kind.
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            BackupKind::Postgres => "pg_backup_",
            BackupKind::Mysql => "mysql_backup_",
            BackupKind::Minio => "minio_backup_",
        }
    }

    pub fn artifact_layout(&self) -> ArtifactLayout {
        match self {
            BackupKind::Postgres | BackupKind::Mysql => ArtifactLayout::File,
            BackupKind::Minio => ArtifactLayout::Directory,
        }
    }

    /// File extension appended to file artifacts.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            BackupKind::Postgres | BackupKind::Mysql => ".sql",
            BackupKind::Minio => "",
        }
    }

    /// Identify the kind that produced an entry, if any.
    ///
    /// The name must be strictly longer than the prefix and the entry type
    /// must match the kind's layout.
    pub fn from_artifact_name(name: &str, is_dir: bool) -> Option<BackupKind> {
        Self::ALL.into_iter().find(|kind| {
            let prefix = kind.artifact_prefix();
            let layout_matches = match kind.artifact_layout() {
                ArtifactLayout::File => !is_dir,
                ArtifactLayout::Directory => is_dir,
            };
            layout_matches && name.len() > prefix.len() && name.starts_with(prefix)
        })
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Postgres => write!(f, "postgres"),
            BackupKind::Mysql => write!(f, "mysql"),
            BackupKind::Minio => write!(f, "minio"),
        }
    }
}

impl std::str::FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(BackupKind::Postgres),
            "mysql" => Ok(BackupKind::Mysql),
            "minio" => Ok(BackupKind::Minio),
            other => Err(format!("unsupported job type: {other}")),
        }
    }
}

/// Lifecycle state of a job run, or of the scheduler itself.
///
/// Jobs move `Pending -> Running -> {Complete | Error}` and start over with
/// `Running` on the next run. `Stopped` is only used for the scheduler key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunState {
    Pending,
    Running,
    Complete,
    Error,
    Stopped,
}

impl JobRunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobRunState::Complete | JobRunState::Error)
    }
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobRunState::Pending => write!(f, "PENDING"),
            JobRunState::Running => write!(f, "RUNNING"),
            JobRunState::Complete => write!(f, "COMPLETE"),
            JobRunState::Error => write!(f, "ERROR"),
            JobRunState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Immutable description of a scheduled backup job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Unique job name, also the name of the job's backup directory.
    pub name: String,
    pub kind: BackupKind,
    /// Cron expression or interval descriptor, see [`super::schedule::Cadence`].
    pub schedule: String,
    pub retention: RetentionPolicy,
}

impl JobSpec {
    pub fn new(
        name: impl Into<String>,
        kind: BackupKind,
        schedule: impl Into<String>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            schedule: schedule.into(),
            retention,
        }
    }
}

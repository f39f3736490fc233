//! Local filesystem backup store.
//!
//! Layout: `<root>/<job_name>/<prefix><YYYYMMDD-HHMMSS><ext>`, where the
//! prefix and extension come from the job's [`BackupKind`]. Directory-shaped
//! artifacts (object store mirrors) carry no extension.

use chrono::{DateTime, Utc};
use domain::models::{BackupArtifact, BackupKind};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Timestamp format embedded in artifact names.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Errors raised by the backup store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid job name '{name}': {reason}")]
    InvalidJobName { name: String, reason: String },

    #[error("failed to create backup directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Backup store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every artifact of `job`. Not created.
    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.root.join(job)
    }

    /// Create the job directory if needed and return it.
    pub fn prepare_job_dir(&self, job: &str) -> Result<PathBuf, StorageError> {
        shared::validation::validate_job_name(job).map_err(|e| StorageError::InvalidJobName {
            name: job.to_string(),
            reason: e
                .message
                .map(|m| m.into_owned())
                .unwrap_or_else(|| e.code.into_owned()),
        })?;

        let dir = self.job_dir(job);
        fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Path for a new artifact of `kind` taken at `at`, creating the job
    /// directory on the way.
    pub fn artifact_path(
        &self,
        job: &str,
        kind: BackupKind,
        at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.prepare_job_dir(job)?;
        Ok(dir.join(artifact_name(kind, at)))
    }
}

/// Artifact file or directory name for `kind` at `at`.
pub fn artifact_name(kind: BackupKind, at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        kind.artifact_prefix(),
        at.format(ARTIFACT_TIMESTAMP_FORMAT),
        kind.artifact_extension()
    )
}

/// Every backup artifact directly inside `dir`.
///
/// Entries whose name carries no known prefix, or whose type does not match
/// the prefix's layout, are not artifacts and are never returned. Entries
/// whose metadata cannot be read are logged and skipped.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<BackupArtifact>> {
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(entry = %name, error = %e, "Failed to read artifact metadata");
                continue;
            }
        };

        let Some(kind) = BackupKind::from_artifact_name(&name, metadata.is_dir()) else {
            continue;
        };

        let modified = match metadata.modified() {
            Ok(time) => DateTime::<Utc>::from(time),
            Err(e) => {
                warn!(entry = %name, error = %e, "Failed to read artifact modification time");
                continue;
            }
        };

        artifacts.push(BackupArtifact {
            path: entry.path(),
            name,
            kind,
            modified,
            size: metadata.len(),
        });
    }

    Ok(artifacts)
}

/// Total size of the regular files under `path`, following no symlinks.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total = total.saturating_add(dir_size(&entry.path())?);
        } else if file_type.is_file() {
            total = total.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(total)
}

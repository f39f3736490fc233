//! MinIO bucket backups through the MinIO client (`mc`).
//!
//! Each run registers a job-specific `mc` alias, then copies the bucket (or
//! one folder of it) recursively into a fresh timestamped directory.

use chrono::Utc;
use domain::errors::ExecutionError;
use domain::models::BackupKind;
use domain::services::{BackupExecutor, ExecutionOutcome};
use persistence::storage::dir_size;
use persistence::LocalStorage;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{run_tool, storage_failure, PartialArtifact};
use crate::config::MinioConfig;

const MC: &str = "mc";
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

pub struct MinioExecutor {
    job: String,
    config: MinioConfig,
    storage: LocalStorage,
}

impl MinioExecutor {
    pub fn new(job: &str, config: MinioConfig, storage: LocalStorage) -> Self {
        Self {
            job: job.to_string(),
            config,
            storage,
        }
    }

    pub fn alias(&self) -> String {
        format!("backmeup-{}", self.job)
    }

    /// Endpoint URL handed to `mc alias set`. A bare host gets its scheme
    /// from `use_ssl`.
    pub fn endpoint_url(&self) -> String {
        let endpoint = &self.config.endpoint;
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.clone()
        } else if self.config.use_ssl {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        }
    }

    /// `ALIAS/BUCKET` or `ALIAS/BUCKET/FOLDER/`.
    pub fn source_path(&self) -> String {
        let base = format!("{}/{}", self.alias(), self.config.bucket_name);
        match self
            .config
            .source_folder
            .as_deref()
            .map(|f| f.trim_matches('/'))
            .filter(|f| !f.is_empty())
        {
            Some(folder) => format!("{base}/{folder}/"),
            None => base,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(MC);
        command.stdin(Stdio::null()).stdout(Stdio::null());
        command
    }

    async fn configure_alias(&self, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let mut command = self.command();
        command.args([
            "alias",
            "set",
            self.alias().as_str(),
            self.endpoint_url().as_str(),
            self.config.access_key.as_str(),
            self.config.secret_key.as_str(),
        ]);
        run_tool(command, "mc alias set", cancel, None).await
    }

    async fn copy_bucket(&self, dest: &Path, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let mut command = self.command();
        command
            .args(["cp", "--recursive", self.source_path().as_str()])
            .arg(dest);
        run_tool(command, "mc cp", cancel, Some(PROGRESS_INTERVAL)).await
    }
}

#[async_trait::async_trait]
impl BackupExecutor for MinioExecutor {
    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionOutcome, ExecutionError> {
        let dest = self
            .storage
            .artifact_path(&self.job, BackupKind::Minio, Utc::now())
            .map_err(storage_failure)?;

        self.configure_alias(&cancel).await?;

        tokio::fs::create_dir_all(&dest).await?;
        let partial = PartialArtifact::new(&dest);
        info!(
            job = %self.job,
            source = %self.source_path(),
            dest = %dest.display(),
            "Copying MinIO bucket"
        );

        self.copy_bucket(&dest, &cancel).await?;

        let size_dir = dest.clone();
        let bytes = tokio::task::spawn_blocking(move || dir_size(&size_dir))
            .await
            .map_err(|e| ExecutionError::Failed(format!("failed to measure backup: {e}")))??;
        partial.keep();

        info!(
            job = %self.job,
            size = %shared::format::format_bytes(bytes),
            "MinIO backup written"
        );
        Ok(ExecutionOutcome::new(dest, Some(bytes)))
    }

    fn describe(&self) -> String {
        "minio".to_string()
    }
}

//! PostgreSQL backups through `pg_dump`.

use chrono::Utc;
use domain::errors::ExecutionError;
use domain::models::BackupKind;
use domain::services::{BackupExecutor, ExecutionOutcome};
use persistence::LocalStorage;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{run_tool_to_file, storage_failure};
use crate::config::PostgresConfig;

const DEFAULT_PORT: &str = "5432";

pub struct PostgresExecutor {
    job: String,
    config: PostgresConfig,
    storage: LocalStorage,
    program: String,
}

impl PostgresExecutor {
    pub fn new(job: &str, config: PostgresConfig, storage: LocalStorage) -> Self {
        Self {
            job: job.to_string(),
            config,
            storage,
            program: "pg_dump".to_string(),
        }
    }

    /// Use a different dump binary, e.g. a versioned `pg_dump15`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to `pg_dump`. Extra options are sorted by name.
    pub fn dump_args(&self) -> Vec<String> {
        let cfg = &self.config;
        let port = cfg
            .port
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PORT);

        let mut args = vec![
            "-h".to_string(),
            cfg.host.clone(),
            "-p".to_string(),
            port.to_string(),
        ];
        if let Some(user) = cfg.user.as_deref().filter(|u| !u.is_empty()) {
            args.push("-U".to_string());
            args.push(user.to_string());
        }
        args.push("-d".to_string());
        args.push(cfg.database.clone());
        args.extend(
            ["--no-password", "--clean", "--if-exists", "--no-owner", "--compress=9"]
                .map(String::from),
        );

        let mut options: Vec<(&String, &String)> = cfg.options.iter().collect();
        options.sort();
        for (key, value) in options {
            if value.is_empty() {
                args.push(format!("--{key}"));
            } else {
                args.push(format!("--{key}={value}"));
            }
        }
        args
    }
}

#[async_trait::async_trait]
impl BackupExecutor for PostgresExecutor {
    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionOutcome, ExecutionError> {
        let path = self
            .storage
            .artifact_path(&self.job, BackupKind::Postgres, Utc::now())
            .map_err(storage_failure)?;

        let mut command = Command::new(&self.program);
        command.args(self.dump_args());
        if let Some(password) = self.config.password.as_deref().filter(|p| !p.is_empty()) {
            command.env("PGPASSWORD", password);
        }

        info!(
            job = %self.job,
            host = %self.config.host,
            database = %self.config.database,
            path = %path.display(),
            "Running pg_dump"
        );
        let bytes = run_tool_to_file(command, &self.program, &path, &cancel).await?;

        info!(
            job = %self.job,
            size = %shared::format::format_bytes(bytes),
            "PostgreSQL backup written"
        );
        Ok(ExecutionOutcome::new(path, Some(bytes)))
    }

    fn describe(&self) -> String {
        "postgres".to_string()
    }
}

//! Common test utilities for integration tests.
//!
//! Builds a full application (scheduler, status registry, metrics, router)
//! over a temporary backup root, with stub executors standing in for the
//! dump tools.

// Helpers are shared between test binaries; not every binary uses all of them.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use backmeup_api::app::{create_app, AppState};
use backmeup_api::config::Config;
use backmeup_api::jobs::{JobScheduler, SchedulerSettings};
use domain::errors::ExecutionError;
use domain::models::{BackupKind, JobRunState, JobSpec, RetentionPolicy};
use domain::services::{BackupExecutor, ExecutionOutcome, MetricsAggregator, StatusRegistry};
use persistence::LocalStorage;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Job schedule that never fires during a test run.
pub const NEVER: &str = "0 0 1 1 *";

pub struct TestApp {
    pub router: Router,
    pub scheduler: Arc<JobScheduler>,
    pub status: Arc<StatusRegistry>,
    pub metrics: Arc<MetricsAggregator>,
    pub storage: LocalStorage,
    pub root: TempDir,
}

/// Test configuration rooted at `root`.
pub fn test_config(root: &std::path::Path) -> Config {
    let yaml = format!(
        r#"
server:
  enabled: true
  port: 8080
storage:
  type: local
  local:
    directory: "{}"
scheduler:
  run_timeout_secs: 5
  shutdown_grace_secs: 1
  tick_resolution_ms: 20
jobs:
  - name: orders
    type: postgres
    postgres_config:
      host: db
      database: orders
    schedule: "{NEVER}"
    retention_policy:
      type: count
      value: 2
"#,
        root.display()
    );
    Config::from_yaml_with(&yaml, |_| None).expect("valid test config")
}

/// Build an application without any registered jobs.
pub fn create_test_app() -> TestApp {
    let root = tempfile::tempdir().expect("temp dir");
    let config = Arc::new(test_config(root.path()));
    let storage = LocalStorage::new(config.storage_root());

    let scheduler = Arc::new(JobScheduler::new(
        storage.clone(),
        SchedulerSettings::from(&config.scheduler),
    ));
    let status = Arc::new(StatusRegistry::new());
    let metrics = Arc::new(MetricsAggregator::new());
    scheduler.subscribe(status.clone());
    scheduler.subscribe(metrics.clone());

    let router = create_app(AppState {
        config,
        scheduler: scheduler.clone(),
        status: status.clone(),
        metrics: metrics.clone(),
    });

    TestApp {
        router,
        scheduler,
        status,
        metrics,
        storage,
        root,
    }
}

pub fn job_spec(name: &str, keep: u32) -> JobSpec {
    JobSpec::new(
        name,
        BackupKind::Postgres,
        NEVER,
        RetentionPolicy::Count(NonZeroU32::new(keep).unwrap()),
    )
}

/// Executor that writes a small dump file, optionally after a delay.
pub struct StubExecutor {
    pub dir: PathBuf,
    pub delay: Duration,
}

#[async_trait::async_trait]
impl BackupExecutor for StubExecutor {
    async fn execute(&self, cancel: CancellationToken) -> Result<ExecutionOutcome, ExecutionError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("pg_backup_{}.sql", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"-- dump")?;
        Ok(ExecutionOutcome::new(path, Some(7)))
    }
}

/// Executor that always fails.
pub struct FailingExecutor;

#[async_trait::async_trait]
impl BackupExecutor for FailingExecutor {
    async fn execute(&self, _cancel: CancellationToken) -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::Failed("pg_dump exited with status 1".into()))
    }
}

impl TestApp {
    pub fn register_stub(&self, name: &str, delay: Duration) {
        let executor = StubExecutor {
            dir: self.storage.job_dir(name),
            delay,
        };
        self.scheduler
            .register(job_spec(name, 2), Arc::new(executor))
            .expect("register stub job");
    }

    pub fn register_failing(&self, name: &str) {
        self.scheduler
            .register(job_spec(name, 2), Arc::new(FailingExecutor))
            .expect("register failing job");
    }

    /// Poll the status registry until `job` reaches `state`.
    pub async fn wait_for_state(&self, job: &str, state: JobRunState) {
        for _ in 0..300 {
            if self.status.get(job) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job '{job}' never reached {state}");
    }
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

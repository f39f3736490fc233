//! Cron-driven backup job scheduler.
//!
//! A single dispatch task sleeps until the earliest next-fire time (capped at
//! the tick resolution), then launches every due job on its own task. A job
//! never overlaps itself: a tick that arrives while the previous run is still
//! active is dropped with a warning, not queued.
//!
//! Per run the scheduler publishes `Running`, executes the job's executor
//! under a deadline, applies retention after a success, publishes a
//! [`RunSummary`], and finally publishes `Complete` or `Error`.

use chrono::{DateTime, Utc};
use domain::errors::{ExecutionError, SchedulerError};
use domain::models::{Cadence, JobRunState, JobSpec, SCHEDULER_STATUS_KEY};
use domain::services::{BackupExecutor, ExecutionOutcome, JobTransition, RunSummary, TransitionListener};
use persistence::{LocalStorage, RetentionEngine};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::middleware::metrics::{record_active_runs, record_job_run, record_skipped_tick};

/// Timing knobs for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Deadline for a single run.
    pub run_timeout: Duration,
    /// Longest the dispatch loop sleeps between due-time checks.
    pub tick_resolution: Duration,
    /// Time a run past its deadline gets to react to cancellation and
    /// remove partial output before its task is aborted.
    pub cancel_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(12 * 60 * 60),
            tick_resolution: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            run_timeout: config.run_timeout(),
            tick_resolution: config.tick_resolution(),
            ..Self::default()
        }
    }
}

/// Result of asking the scheduler to start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    /// The job already has an active run; the request was dropped.
    AlreadyRunning,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

struct RegisteredJob {
    spec: JobSpec,
    cadence: Cadence,
    executor: Arc<dyn BackupExecutor>,
    job_dir: PathBuf,
    next_fire: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

impl RegisteredJob {
    fn next_fire(&self) -> Option<DateTime<Utc>> {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reschedule(&self, after: DateTime<Utc>) {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner()) = self.cadence.next_after(after);
    }

    /// Advance past `now` if due; returns whether the job fired.
    fn take_due(&self, now: DateTime<Utc>) -> bool {
        let mut next = self.next_fire.lock().unwrap_or_else(|e| e.into_inner());
        match *next {
            Some(at) if at <= now => {
                // Missed ticks collapse into this one.
                *next = self.cadence.next_after(now);
                true
            }
            _ => false,
        }
    }
}

struct Shared {
    jobs: RwLock<HashMap<String, Arc<RegisteredJob>>>,
    listeners: RwLock<Vec<Arc<dyn TransitionListener>>>,
    settings: SchedulerSettings,
    storage: LocalStorage,
    retention: RetentionEngine,
    tracker: TaskTracker,
    /// Stops the dispatch loop and refuses new runs.
    shutdown: CancellationToken,
    /// Parent of every run's cancellation token.
    runs_cancel: CancellationToken,
    active_runs: AtomicUsize,
}

/// Schedules backup jobs and runs them with bounded lifetime.
pub struct JobScheduler {
    inner: Arc<Shared>,
    state: Mutex<Lifecycle>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create a scheduler storing artifacts under `storage`.
    pub fn new(storage: LocalStorage, settings: SchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Shared {
                jobs: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
                settings,
                storage,
                retention: RetentionEngine::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                runs_cancel: CancellationToken::new(),
                active_runs: AtomicUsize::new(0),
            }),
            state: Mutex::new(Lifecycle::Idle),
            dispatcher: Mutex::new(None),
        }
    }

    /// Register a job.
    ///
    /// Fails with [`SchedulerError::InvalidSchedule`] when the schedule does
    /// not parse and [`SchedulerError::DuplicateJob`] when the name is taken
    /// (the scheduler's own status key counts as taken). On success every
    /// subscriber sees the job as `Pending`.
    pub fn register(
        &self,
        spec: JobSpec,
        executor: Arc<dyn BackupExecutor>,
    ) -> Result<(), SchedulerError> {
        if spec.name == SCHEDULER_STATUS_KEY {
            return Err(SchedulerError::DuplicateJob(spec.name));
        }

        let cadence =
            Cadence::parse(&spec.schedule).map_err(|source| SchedulerError::InvalidSchedule {
                job: spec.name.clone(),
                expression: spec.schedule.clone(),
                source,
            })?;

        let name = spec.name.clone();
        let job = Arc::new(RegisteredJob {
            job_dir: self.inner.storage.job_dir(&name),
            next_fire: Mutex::new(cadence.next_after(Utc::now())),
            running: AtomicBool::new(false),
            spec,
            cadence,
            executor,
        });

        {
            let mut jobs = self.inner.jobs.write().unwrap_or_else(|e| e.into_inner());
            if jobs.contains_key(&name) {
                return Err(SchedulerError::DuplicateJob(name));
            }
            jobs.insert(name.clone(), Arc::clone(&job));
        }

        info!(
            job = %name,
            kind = %job.spec.kind,
            schedule = %job.spec.schedule,
            executor = %job.executor.describe(),
            next_run = ?job.next_fire(),
            "Job registered"
        );
        self.inner
            .notify(&JobTransition::new(name, JobRunState::Pending));
        Ok(())
    }

    /// Add a subscriber and replay `Pending` for every registered job to it.
    pub fn subscribe(&self, listener: Arc<dyn TransitionListener>) {
        let names = self.job_names();
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&listener));

        for name in names {
            listener.on_transition(&JobTransition::new(name, JobRunState::Pending));
        }
    }

    /// Start the dispatch loop. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime. A scheduler starts at
    /// most once; any later call fails with [`SchedulerError::AlreadyStarted`].
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != Lifecycle::Idle {
                return Err(SchedulerError::AlreadyStarted);
            }
            *state = Lifecycle::Running;
        }

        let now = Utc::now();
        for job in self.inner.snapshot_jobs() {
            job.reschedule(now);
        }

        let handle = tokio::spawn(dispatch_loop(Arc::clone(&self.inner)));
        *self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(jobs = self.inner.job_count(), "Job scheduler started");
        self.inner
            .notify(&JobTransition::new(SCHEDULER_STATUS_KEY, JobRunState::Running));
        Ok(())
    }

    /// Stop scheduling and wait up to `grace` for in-flight runs.
    ///
    /// Runs still active once `grace` elapses are signalled to cancel and
    /// abandoned: this returns without waiting for them. The scheduler is
    /// reported `Stopped` either way. Calling `stop` again is a no-op.
    pub async fn stop(&self, grace: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == Lifecycle::Stopped {
                return;
            }
            *state = Lifecycle::Stopped;
        }

        info!(grace_ms = grace.as_millis() as u64, "Stopping job scheduler");
        self.inner.shutdown.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop panicked");
            }
        }

        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => info!("All job runs finished"),
            Err(_) => {
                warn!(
                    active_runs = self.inner.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "Grace period elapsed; cancelling and abandoning in-flight runs"
                );
                self.inner.runs_cancel.cancel();
            }
        }

        self.inner
            .notify(&JobTransition::new(SCHEDULER_STATUS_KEY, JobRunState::Stopped));
        info!("Job scheduler stopped");
    }

    /// Run a job now, outside its cadence.
    ///
    /// Nothing runs unless the outcome is [`RunOutcome::Started`].
    pub fn trigger(&self, name: &str) -> Result<RunOutcome, SchedulerError> {
        let job = self
            .inner
            .job(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        info!(job = %name, "Manual run requested");
        Ok(self.inner.launch(job))
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let jobs = self.inner.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn job_spec(&self, name: &str) -> Option<JobSpec> {
        self.inner.job(name).map(|job| job.spec.clone())
    }

    /// Next scheduled fire time of a job.
    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.inner.job(name).and_then(|job| job.next_fire())
    }

    /// Whether a run of `name` is in flight.
    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.inner
            .job(name)
            .map(|job| job.running.load(Ordering::SeqCst))
    }

    pub fn active_runs(&self) -> usize {
        self.inner.active_runs.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn job(&self, name: &str) -> Option<Arc<RegisteredJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(name).cloned()
    }

    fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn snapshot_jobs(&self) -> Vec<Arc<RegisteredJob>> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }

    /// Deliver a transition to every subscriber. No lock is held while
    /// subscribers run.
    fn notify(&self, transition: &JobTransition) {
        for listener in self.listeners_snapshot() {
            listener.on_transition(transition);
        }
    }

    fn notify_run_complete(&self, summary: &RunSummary) {
        for listener in self.listeners_snapshot() {
            listener.on_run_complete(summary);
        }
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn TransitionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Time until the earliest next fire, capped at the tick resolution.
    fn sleep_duration(&self, now: DateTime<Utc>) -> Duration {
        self.snapshot_jobs()
            .iter()
            .filter_map(|job| job.next_fire())
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.settings.tick_resolution)
            .min(self.settings.tick_resolution)
    }

    /// Claim the job and spawn a run.
    fn launch(self: &Arc<Self>, job: Arc<RegisteredJob>) -> RunOutcome {
        if self.shutdown.is_cancelled() {
            debug!(job = %job.spec.name, "Scheduler stopping, run not started");
            return RunOutcome::ShuttingDown;
        }

        if job
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                job = %job.spec.name,
                "Previous run still active, skipping tick"
            );
            record_skipped_tick(&job.spec.name);
            return RunOutcome::AlreadyRunning;
        }

        let active = self.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        record_active_runs(active);

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("backup_run", job = %job.spec.name, run_id = %run_id);
        self.tracker
            .spawn(run_job(Arc::clone(self), job, run_id).instrument(span));
        RunOutcome::Started
    }
}

async fn dispatch_loop(inner: Arc<Shared>) {
    debug!(
        tick_resolution_ms = inner.settings.tick_resolution.as_millis() as u64,
        "Dispatch loop running"
    );

    loop {
        let now = Utc::now();
        for job in inner.snapshot_jobs() {
            if job.take_due(now) {
                inner.launch(job);
            }
        }

        let sleep_for = inner.sleep_duration(Utc::now());
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }

    debug!("Dispatch loop exited");
}

/// Releases a job's running flag once its run is fully reported.
struct RunGuard {
    inner: Arc<Shared>,
    job: Arc<RegisteredJob>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.job.running.store(false, Ordering::SeqCst);
        let active = self.inner.active_runs.fetch_sub(1, Ordering::SeqCst) - 1;
        record_active_runs(active);
    }
}

async fn run_job(inner: Arc<Shared>, job: Arc<RegisteredJob>, run_id: Uuid) {
    let _guard = RunGuard {
        inner: Arc::clone(&inner),
        job: Arc::clone(&job),
    };
    let name = job.spec.name.clone();

    let started_at = Utc::now();
    let start = Instant::now();
    inner.notify(&JobTransition::new(name.clone(), JobRunState::Running));
    info!("Backup run starting");

    let result = execute_with_deadline(&inner, &job).await;
    let duration = start.elapsed();

    if result.is_ok() {
        apply_retention(&inner, &job).await;
    }

    let (bytes_written, error) = match &result {
        Ok(outcome) => (outcome.bytes_written, None),
        Err(e) => (None, Some(e.to_string())),
    };

    match &result {
        Ok(outcome) => {
            if let Some(bytes) = outcome.bytes_written {
                persistence::metrics::record_artifact_size(&name, bytes);
            }
            info!(
                elapsed_ms = duration.as_millis() as u64,
                bytes = outcome.bytes_written,
                artifact = ?outcome.artifact,
                "Backup run completed"
            );
        }
        Err(e) => error!(
            elapsed_ms = duration.as_millis() as u64,
            error = %e,
            "Backup run failed"
        ),
    }

    record_job_run(&name, result.is_ok(), duration, bytes_written);
    inner.notify_run_complete(&RunSummary {
        job: name.clone(),
        run_id,
        started_at,
        duration,
        success: result.is_ok(),
        bytes_written,
        error: error.clone(),
    });

    let transition = match error {
        None => JobTransition::new(name, JobRunState::Complete),
        Some(message) => JobTransition::new(name, JobRunState::Error).with_message(message),
    };
    inner.notify(&transition);
}

async fn execute_with_deadline(
    inner: &Shared,
    job: &RegisteredJob,
) -> Result<ExecutionOutcome, ExecutionError> {
    let cancel = inner.runs_cancel.child_token();
    let executor = Arc::clone(&job.executor);
    let token = cancel.clone();
    let mut handle = tokio::spawn(async move { executor.execute(token).await });

    let deadline = inner.settings.run_timeout;
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => {
            let payload = join_error.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExecutionError::Panicked(message))
        }
        Ok(Err(_)) => Err(ExecutionError::Cancelled),
        Err(_) => {
            // Let the executor observe cancellation and remove partial output.
            cancel.cancel();
            if tokio::time::timeout(inner.settings.cancel_grace, &mut handle)
                .await
                .is_err()
            {
                warn!("Executor ignored cancellation, aborting run task");
                handle.abort();
            }
            Err(ExecutionError::DeadlineExceeded(deadline))
        }
    }
}

/// Retention failures are logged and never change the run's outcome.
async fn apply_retention(inner: &Shared, job: &RegisteredJob) {
    let engine = inner.retention;
    let dir = job.job_dir.clone();
    let policy = job.spec.retention;

    let timer = persistence::metrics::StorageTimer::new("retention");
    match tokio::task::spawn_blocking(move || engine.apply(&dir, &policy)).await {
        Ok(Ok(report)) => {
            timer.record();
            debug!(
                deleted = report.deleted.len(),
                retained = report.retained,
                "Retention applied"
            );
        }
        Ok(Err(e)) => warn!(error = %e, "Retention failed"),
        Err(e) => warn!(error = %e, "Retention task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{BackupKind, RetentionPolicy};
    use domain::services::{FnListener, MetricsAggregator, StatusRegistry};
    use std::fs;
    use std::num::NonZeroU32;
    use std::path::Path;
    use std::time::SystemTime;

    const NEVER_SOON: &str = "0 0 1 1 *";

    fn spec(name: &str, schedule: &str, keep: u32) -> JobSpec {
        JobSpec::new(
            name,
            BackupKind::Postgres,
            schedule,
            RetentionPolicy::Count(NonZeroU32::new(keep).unwrap()),
        )
    }

    fn scheduler(root: &Path) -> JobScheduler {
        JobScheduler::new(
            LocalStorage::new(root),
            SchedulerSettings {
                run_timeout: Duration::from_secs(10),
                tick_resolution: Duration::from_millis(20),
                cancel_grace: Duration::from_millis(200),
            },
        )
    }

    async fn wait_for_state(
        registry: &StatusRegistry,
        job: &str,
        state: JobRunState,
    ) -> bool {
        for _ in 0..300 {
            if registry.get(job) == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn write_aged(path: &Path, age: Duration) {
        fs::write(path, b"-- dump").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Sleeps, tracking how many runs overlap.
    struct SlowExecutor {
        delay: Duration,
        runs: Arc<AtomicUsize>,
        current: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackupExecutor for SlowExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ExecutionOutcome::default())
        }
    }

    struct FailingExecutor;

    #[async_trait::async_trait]
    impl BackupExecutor for FailingExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            Err(ExecutionError::Failed("pg_dump exited with status 1".into()))
        }
    }

    /// Writes one fresh artifact into the job directory.
    struct ArtifactExecutor {
        dir: PathBuf,
    }

    #[async_trait::async_trait]
    impl BackupExecutor for ArtifactExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            fs::create_dir_all(&self.dir)?;
            let path = self.dir.join("pg_backup_new.sql");
            fs::write(&path, vec![b'x'; 4096])?;
            Ok(ExecutionOutcome::new(path, Some(4096)))
        }
    }

    /// Ignores cancellation entirely.
    struct HungExecutor;

    #[async_trait::async_trait]
    impl BackupExecutor for HungExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    /// Streams into a dump file through a tool that outlives any deadline.
    #[cfg(unix)]
    struct StalledDumpExecutor {
        dir: PathBuf,
    }

    #[cfg(unix)]
    #[async_trait::async_trait]
    impl BackupExecutor for StalledDumpExecutor {
        async fn execute(
            &self,
            cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            fs::create_dir_all(&self.dir)?;
            let path = self.dir.join("pg_backup_stalled.sql");
            let mut command = tokio::process::Command::new("sh");
            command.args(["-c", "echo partial; sleep 30"]);
            let bytes =
                crate::jobs::executors::run_tool_to_file(command, "sh", &path, &cancel).await?;
            Ok(ExecutionOutcome::new(path, Some(bytes)))
        }
    }

    struct PanickingExecutor;

    #[async_trait::async_trait]
    impl BackupExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            panic!("dump tool vanished");
        }
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_schedule() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());

        let err = scheduler
            .register(spec("orders", "not a cron", 1), Arc::new(FailingExecutor))
            .unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert!(err.is_configuration_error());
        assert!(scheduler.job_names().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_reserved_name() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());

        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(FailingExecutor))
            .unwrap();
        assert!(matches!(
            scheduler.register(spec("orders", NEVER_SOON, 1), Arc::new(FailingExecutor)),
            Err(SchedulerError::DuplicateJob(name)) if name == "orders"
        ));
        assert!(matches!(
            scheduler.register(spec("scheduler", NEVER_SOON, 1), Arc::new(FailingExecutor)),
            Err(SchedulerError::DuplicateJob(_))
        ));
        assert_eq!(scheduler.job_names(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_register_publishes_pending_and_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());

        scheduler
            .register(spec("orders", "0 2 * * *", 1), Arc::new(FailingExecutor))
            .unwrap();

        assert_eq!(registry.get("orders"), Some(JobRunState::Pending));
        let next = scheduler.next_run("orders").unwrap();
        assert!(next > Utc::now());
        assert!(scheduler.next_run("missing").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_replays_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(FailingExecutor))
            .unwrap();
        scheduler
            .register(spec("users", NEVER_SOON, 1), Arc::new(FailingExecutor))
            .unwrap();

        let seen: Arc<Mutex<Vec<(String, JobRunState)>>> = Arc::default();
        let sink = seen.clone();
        scheduler.subscribe(Arc::new(FnListener::new(move |t: &JobTransition| {
            sink.lock().unwrap().push((t.job.clone(), t.state));
        })));

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("orders".to_string(), JobRunState::Pending),
                ("users".to_string(), JobRunState::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());

        scheduler.start().unwrap();
        assert_eq!(registry.get(SCHEDULER_STATUS_KEY), Some(JobRunState::Running));
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

        scheduler.stop(Duration::from_secs(1)).await;
        assert_eq!(registry.get(SCHEDULER_STATUS_KEY), Some(JobRunState::Stopped));
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));

        // Stopping again is a no-op.
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_runs_never_overlap() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let runs = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        scheduler
            .register(
                spec("orders", "@every 50ms", 5),
                Arc::new(SlowExecutor {
                    delay: Duration::from_millis(200),
                    runs: runs.clone(),
                    current: Arc::new(AtomicUsize::new(0)),
                    max_concurrent: max_concurrent.clone(),
                }),
            )
            .unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        scheduler.stop(Duration::from_secs(2)).await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_job_does_not_block_others() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let fast_runs = Arc::new(AtomicUsize::new(0));

        scheduler
            .register(spec("slow", "@every 20ms", 1), Arc::new(HungExecutor))
            .unwrap();
        scheduler
            .register(
                spec("fast", "@every 50ms", 1),
                Arc::new(SlowExecutor {
                    delay: Duration::from_millis(1),
                    runs: fast_runs.clone(),
                    current: Arc::new(AtomicUsize::new(0)),
                    max_concurrent: Arc::new(AtomicUsize::new(0)),
                }),
            )
            .unwrap();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.stop(Duration::from_millis(50)).await;

        assert!(fast_runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_failing_job_reports_error_and_skips_retention() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        let metrics = Arc::new(MetricsAggregator::new());
        scheduler.subscribe(registry.clone());
        scheduler.subscribe(metrics.clone());

        let dir = tmp.path().join("a");
        fs::create_dir_all(&dir).unwrap();
        write_aged(&dir.join("pg_backup_1.sql"), Duration::from_secs(7200));
        write_aged(&dir.join("pg_backup_2.sql"), Duration::from_secs(3600));

        scheduler
            .register(spec("a", NEVER_SOON, 1), Arc::new(FailingExecutor))
            .unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.trigger("a").unwrap(), RunOutcome::Started);

        assert!(wait_for_state(&registry, "a", JobRunState::Error).await);
        let entry = registry.entry("a").unwrap();
        assert_eq!(entry.message.as_deref(), Some("pg_dump exited with status 1"));

        let snapshot = metrics.snapshot("a").unwrap();
        assert_eq!(snapshot.failed_runs, 1);
        assert_eq!(snapshot.total_runs, 1);
        assert_eq!(file_names(&dir), vec!["pg_backup_1.sql", "pg_backup_2.sql"]);
        assert!(!registry.is_healthy());

        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_successful_job_applies_retention() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        let metrics = Arc::new(MetricsAggregator::new());
        scheduler.subscribe(registry.clone());
        scheduler.subscribe(metrics.clone());

        let dir = tmp.path().join("b");
        fs::create_dir_all(&dir).unwrap();
        write_aged(&dir.join("pg_backup_old1.sql"), Duration::from_secs(3 * 86400));
        write_aged(&dir.join("pg_backup_old2.sql"), Duration::from_secs(2 * 86400));
        write_aged(&dir.join("pg_backup_old3.sql"), Duration::from_secs(86400));

        scheduler
            .register(
                spec("b", NEVER_SOON, 2),
                Arc::new(ArtifactExecutor { dir: dir.clone() }),
            )
            .unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.trigger("b").unwrap(), RunOutcome::Started);

        assert!(wait_for_state(&registry, "b", JobRunState::Complete).await);
        assert_eq!(file_names(&dir), vec!["pg_backup_new.sql", "pg_backup_old3.sql"]);

        let snapshot = metrics.snapshot("b").unwrap();
        assert_eq!(snapshot.successful_runs, 1);
        assert_eq!(snapshot.last_backup_size, 4096);
        assert!(registry.is_healthy());

        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_transitions_are_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        let seen: Arc<Mutex<Vec<JobRunState>>> = Arc::default();
        let sink = seen.clone();
        scheduler.subscribe(registry.clone());
        scheduler.subscribe(Arc::new(FnListener::new(move |t: &JobTransition| {
            if t.job == "orders" {
                sink.lock().unwrap().push(t.state);
            }
        })));

        scheduler
            .register(
                spec("orders", NEVER_SOON, 1),
                Arc::new(ArtifactExecutor {
                    dir: tmp.path().join("orders"),
                }),
            )
            .unwrap();
        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Complete).await);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![JobRunState::Pending, JobRunState::Running, JobRunState::Complete]
        );
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_trigger_while_running_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());

        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(HungExecutor))
            .unwrap();

        assert_eq!(scheduler.trigger("orders").unwrap(), RunOutcome::Started);
        assert!(wait_for_state(&registry, "orders", JobRunState::Running).await);
        assert_eq!(scheduler.is_running("orders"), Some(true));
        assert_eq!(
            scheduler.trigger("orders").unwrap(),
            RunOutcome::AlreadyRunning
        );
        assert!(matches!(
            scheduler.trigger("missing"),
            Err(SchedulerError::JobNotFound(_))
        ));

        scheduler.stop(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(
            LocalStorage::new(tmp.path()),
            SchedulerSettings {
                run_timeout: Duration::from_millis(100),
                tick_resolution: Duration::from_millis(20),
                cancel_grace: Duration::from_millis(200),
            },
        );
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());
        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(HungExecutor))
            .unwrap();

        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Error).await);
        let message = registry.entry("orders").unwrap().message.unwrap();
        assert!(message.contains("deadline"));
        assert_eq!(scheduler.is_running("orders"), Some(false));

        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_removes_partial_dump() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let dir = storage.job_dir("orders");
        let scheduler = JobScheduler::new(
            storage,
            SchedulerSettings {
                run_timeout: Duration::from_millis(300),
                tick_resolution: Duration::from_millis(20),
                cancel_grace: Duration::from_secs(2),
            },
        );
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());
        scheduler
            .register(
                spec("orders", NEVER_SOON, 1),
                Arc::new(StalledDumpExecutor { dir: dir.clone() }),
            )
            .unwrap();

        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Error).await);

        assert!(file_names(&dir).is_empty());
        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_panicking_executor_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());
        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(PanickingExecutor))
            .unwrap();

        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Error).await);
        let message = registry.entry("orders").unwrap().message.unwrap();
        assert!(message.contains("dump tool vanished"));

        scheduler.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_abandons_hung_run_after_grace() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());
        scheduler
            .register(spec("orders", NEVER_SOON, 1), Arc::new(HungExecutor))
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Running).await);

        let started = Instant::now();
        tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.stop(Duration::from_millis(100)),
        )
        .await
        .expect("stop must return after the grace period");

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(registry.get(SCHEDULER_STATUS_KEY), Some(JobRunState::Stopped));
        assert!(!registry.is_healthy());
        assert_eq!(
            scheduler.trigger("orders").unwrap(),
            RunOutcome::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_run() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = scheduler(tmp.path());
        let registry = Arc::new(StatusRegistry::new());
        scheduler.subscribe(registry.clone());
        scheduler
            .register(
                spec("orders", NEVER_SOON, 1),
                Arc::new(SlowExecutor {
                    delay: Duration::from_millis(150),
                    runs: Arc::new(AtomicUsize::new(0)),
                    current: Arc::new(AtomicUsize::new(0)),
                    max_concurrent: Arc::new(AtomicUsize::new(0)),
                }),
            )
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger("orders").unwrap();
        assert!(wait_for_state(&registry, "orders", JobRunState::Running).await);

        scheduler.stop(Duration::from_secs(5)).await;

        assert_eq!(registry.get("orders"), Some(JobRunState::Complete));
        assert_eq!(scheduler.active_runs(), 0);
    }
}

//! Backup job scheduling and the executors that perform the backups.

pub mod executors;
mod scheduler;

pub use executors::{create_executor, ExecutorError};
pub use scheduler::{JobScheduler, RunOutcome, SchedulerSettings};

use persistence::LocalStorage;
use tracing::{error, info};

use crate::config::JobConfig;

/// Register every configured job with `scheduler`.
///
/// A job whose definition cannot be turned into a spec, an executor, or a
/// registration is logged and skipped. Returns how many jobs were registered.
pub fn register_configured_jobs(
    scheduler: &JobScheduler,
    jobs: &[JobConfig],
    storage: &LocalStorage,
) -> usize {
    let mut registered = 0;

    for job in jobs {
        let spec = match job.to_spec() {
            Ok(spec) => spec,
            Err(e) => {
                error!(job = %job.name, error = %e, "Invalid job definition, skipping");
                continue;
            }
        };

        let executor = match create_executor(job, storage) {
            Ok(executor) => executor,
            Err(e) => {
                error!(job = %job.name, error = %e, "Failed to create executor, skipping");
                continue;
            }
        };

        match scheduler.register(spec, executor) {
            Ok(()) => registered += 1,
            Err(e) => error!(job = %job.name, error = %e, "Failed to register job, skipping"),
        }
    }

    info!(registered, configured = jobs.len(), "Backup jobs registered");
    registered
}

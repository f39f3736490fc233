//! Per-job run statistics.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Cumulative statistics for one job.
///
/// `successful_runs + failed_runs == total_runs` always holds. Durations are
/// serialized as whole milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    #[serde(rename = "lastRunDurationMs", serialize_with = "serialize_millis")]
    pub last_run_duration: Duration,
    #[serde(rename = "averageRunDurationMs", serialize_with = "serialize_millis")]
    pub average_run_duration: Duration,
    pub last_run_time: Option<DateTime<Utc>>,
    /// Bytes written by the most recent run; 0 when unknown.
    pub last_backup_size: u64,
    pub total_backup_size: u64,
}

impl JobMetrics {
    /// Fold one finished run into the statistics.
    ///
    /// The average is updated incrementally from the previous mean, so the
    /// full duration history never needs to be kept.
    pub fn record(
        &mut self,
        success: bool,
        duration: Duration,
        bytes_written: Option<u64>,
        finished_at: DateTime<Utc>,
    ) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }

        let n = u128::from(self.total_runs);
        let previous = self.average_run_duration.as_nanos();
        let current = duration.as_nanos();
        let average = if current >= previous {
            previous + (current - previous) / n
        } else {
            previous - (previous - current) / n
        };
        self.average_run_duration = nanos_to_duration(average);

        let bytes = bytes_written.unwrap_or(0);
        self.last_run_duration = duration;
        self.last_run_time = Some(finished_at);
        self.last_backup_size = bytes;
        self.total_backup_size = self.total_backup_size.saturating_add(bytes);
    }

    /// Fraction of runs that succeeded, or `None` before the first run.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_runs > 0).then(|| self.successful_runs as f64 / self.total_runs as f64)
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    let secs = (nanos / 1_000_000_000).min(u128::from(u64::MAX)) as u64;
    let subsec = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, subsec)
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis().min(u128::from(u64::MAX)) as u64)
}

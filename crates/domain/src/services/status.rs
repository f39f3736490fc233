//! Latest known state of every job and of the scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use super::listener::{JobTransition, TransitionListener};
use crate::models::{JobRunState, SCHEDULER_STATUS_KEY};

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub state: JobRunState,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Thread-safe map from job name to its most recent state.
///
/// Writes are last-writer-wins per key. Reads return copies, so callers never
/// observe later mutations.
#[derive(Debug)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<String, StatusEntry>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    /// Create a registry with the scheduler marked as stopped.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            SCHEDULER_STATUS_KEY.to_string(),
            StatusEntry {
                state: JobRunState::Stopped,
                updated_at: Utc::now(),
                message: None,
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn set_status(&self, name: &str, state: JobRunState) {
        self.set_status_with_message(name, state, None);
    }

    pub fn set_status_with_message(&self, name: &str, state: JobRunState, message: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            name.to_string(),
            StatusEntry {
                state,
                updated_at: Utc::now(),
                message,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<JobRunState> {
        self.entry(name).map(|e| e.state)
    }

    pub fn entry(&self, name: &str) -> Option<StatusEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).cloned()
    }

    /// Copy of every name and state.
    pub fn snapshot(&self) -> HashMap<String, JobRunState> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    /// Copy of every entry including timestamps and messages.
    pub fn entries(&self) -> HashMap<String, StatusEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    /// True when the scheduler is running and no job is in `Error`.
    pub fn is_healthy(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let scheduler_running = entries
            .get(SCHEDULER_STATUS_KEY)
            .is_some_and(|e| e.state == JobRunState::Running);
        scheduler_running && entries.values().all(|e| e.state != JobRunState::Error)
    }
}

impl TransitionListener for StatusRegistry {
    fn on_transition(&self, transition: &JobTransition) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            transition.job.clone(),
            StatusEntry {
                state: transition.state,
                updated_at: transition.timestamp,
                message: transition.message.clone(),
            },
        );
    }
}

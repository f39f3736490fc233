//! Run outcome notifications.
//!
//! Sends a Discord message and/or a generic JSON webhook when a job run
//! finishes. Delivery is best-effort: each request runs on its own task with
//! a short timeout, failures are logged and never retried.

use chrono::{DateTime, SecondsFormat, Utc};
use domain::models::JobRunState;
use domain::services::{JobTransition, TransitionListener};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DiscordConfig, JobConfig, NotificationConfig, WebhookConfig};

/// Notification delivery timeout in seconds.
const NOTIFICATION_TIMEOUT_SECS: u64 = 5;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Which run outcome a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Success,
    Failure,
}

impl RunEvent {
    pub fn from_state(state: JobRunState) -> Option<Self> {
        match state {
            JobRunState::Complete => Some(RunEvent::Success),
            JobRunState::Error => Some(RunEvent::Failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunEvent::Success => "success",
            RunEvent::Failure => "failure",
        }
    }
}

/// Body posted to a generic webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub job: String,
    pub status: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookPayload {
    pub fn from_transition(transition: &JobTransition) -> Self {
        Self {
            job: transition.job.clone(),
            status: transition.state.to_string(),
            timestamp: rfc3339(transition.timestamp),
            message: transition.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscordPayload {
    pub content: String,
}

impl DiscordPayload {
    pub fn for_event(transition: &JobTransition, event: RunEvent) -> Self {
        let content = match event {
            RunEvent::Success => format!(
                "✅ Backup job `{}` completed successfully at {}",
                transition.job,
                rfc3339(transition.timestamp)
            ),
            RunEvent::Failure => format!(
                "❌ Backup job `{}` failed at {}: {}",
                transition.job,
                rfc3339(transition.timestamp),
                transition.message.as_deref().unwrap_or("unknown error")
            ),
        };
        Self { content }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Whether a Discord target subscribed to `event`. An empty list means both.
fn discord_wants(discord: &DiscordConfig, event: RunEvent) -> bool {
    discord.when.is_empty() || discord.when.iter().any(|w| w == event.as_str())
}

/// Subscriber that posts run outcomes to each job's configured targets.
pub struct NotificationListener {
    client: Client,
    targets: HashMap<String, NotificationConfig>,
}

impl NotificationListener {
    /// Build a listener for every job with notifications enabled.
    pub fn new(jobs: &[JobConfig]) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NOTIFICATION_TIMEOUT_SECS))
            .build()?;

        let targets = jobs
            .iter()
            .filter(|job| job.notification.enabled)
            .map(|job| (job.name.clone(), job.notification.clone()))
            .collect();

        Ok(Self { client, targets })
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn spawn_delivery(&self, target: &'static str, request: reqwest::RequestBuilder, job: String) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(job = %job, target, "No runtime available, notification dropped");
                return;
            }
        };

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(job = %job, target, status = response.status().as_u16(), "Notification delivered");
                }
                Ok(response) => {
                    warn!(
                        job = %job,
                        target,
                        status = response.status().as_u16(),
                        "Notification rejected"
                    );
                }
                Err(e) => {
                    warn!(job = %job, target, error = %e, "Notification delivery failed");
                }
            }
        });
    }

    fn send_discord(&self, discord: &DiscordConfig, transition: &JobTransition, event: RunEvent) {
        let request = self
            .client
            .post(&discord.webhook_url)
            .json(&DiscordPayload::for_event(transition, event));
        self.spawn_delivery("discord", request, transition.job.clone());
    }

    fn send_webhook(&self, webhook: &WebhookConfig, transition: &JobTransition) {
        let body = match serde_json::to_vec(&WebhookPayload::from_transition(transition)) {
            Ok(body) => body,
            Err(e) => {
                warn!(job = %transition.job, error = %e, "Failed to serialize webhook payload");
                return;
            }
        };

        let mut request = self
            .client
            .post(&webhook.url)
            .header(
                reqwest::header::CONTENT_TYPE,
                webhook.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .body(body);
        for (name, value) in &webhook.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = webhook.auth_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        self.spawn_delivery("webhook", request, transition.job.clone());
    }
}

impl TransitionListener for NotificationListener {
    fn on_transition(&self, transition: &JobTransition) {
        let Some(event) = RunEvent::from_state(transition.state) else {
            return;
        };
        let Some(config) = self.targets.get(&transition.job) else {
            return;
        };

        info!(job = %transition.job, event = event.as_str(), "Sending run notification");

        if let Some(discord) = config.discord.as_ref().filter(|d| discord_wants(d, event)) {
            self.send_discord(discord, transition, event);
        }
        if let Some(webhook) = &config.webhook {
            self.send_webhook(webhook, transition);
        }
    }
}

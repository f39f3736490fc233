use domain::models::{BackupKind, JobSpec, RetentionPolicy};
use serde::Deserialize;
use shared::validation::validate_job_name;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "BACKMEUP_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    /// Validated to 1..=65535 when the server is enabled.
    #[serde(default = "default_port")]
    pub port: i64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub local: LocalStorageConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default)]
    pub directory: String,

    /// Informational only; not enforced.
    #[serde(default)]
    pub max_size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on a single run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How long shutdown waits for in-flight runs.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Longest the dispatch loop sleeps between due-time checks.
    #[serde(default = "default_tick_resolution")]
    pub tick_resolution_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            tick_resolution_ms: default_tick_resolution(),
        }
    }
}

impl SchedulerConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn tick_resolution(&self) -> Duration {
        Duration::from_millis(self.tick_resolution_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobConfig {
    #[validate(custom(function = "validate_job_name"))]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub postgres_config: Option<PostgresConfig>,

    #[serde(default)]
    pub mysql_config: Option<MysqlConfig>,

    #[serde(default)]
    pub minio_config: Option<MinioConfig>,

    #[validate(length(min = 1, message = "Schedule must not be empty"))]
    #[serde(default)]
    pub schedule: String,

    pub retention_policy: RetentionPolicyConfig,

    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: String,
    /// Extra `pg_dump` flags; an empty value renders as a bare `--flag`.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MysqlConfig {
    #[serde(default)]
    pub connection_string: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinioConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub source_folder: Option<String>,
}

/// Retention as written in the file: `type: count|days`, `value: N`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionPolicyConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: i64,
}

impl RetentionPolicyConfig {
    pub fn to_policy(&self) -> Result<RetentionPolicy, ConfigValidationError> {
        let value = u32::try_from(self.value)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                ConfigValidationError::InvalidValue(format!(
                    "retention policy value must be a positive integer, got {}",
                    self.value
                ))
            })?;

        match self.kind.as_str() {
            "count" => Ok(RetentionPolicy::Count(value)),
            "days" => Ok(RetentionPolicy::Age(value)),
            other => Err(ConfigValidationError::InvalidValue(format!(
                "invalid retention policy type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DiscordConfig {
    /// Events to announce: `success`, `failure`.
    #[serde(default)]
    pub when: Vec<String>,

    #[validate(url(message = "Invalid Discord webhook URL"))]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WebhookConfig {
    #[validate(url(message = "Invalid webhook URL"))]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl JobConfig {
    pub fn backup_kind(&self) -> Result<BackupKind, ConfigValidationError> {
        self.kind.parse::<BackupKind>().map_err(|_| {
            ConfigValidationError::InvalidValue(format!(
                "unsupported job type '{}' for job '{}'",
                self.kind, self.name
            ))
        })
    }

    /// Build the scheduler's view of this job.
    pub fn to_spec(&self) -> Result<JobSpec, ConfigValidationError> {
        Ok(JobSpec::new(
            self.name.clone(),
            self.backup_kind()?,
            self.schedule.clone(),
            self.retention_policy.to_policy()?,
        ))
    }

    fn validate_job(&self, index: usize) -> Result<(), ConfigValidationError> {
        if self.name.is_empty() {
            return Err(ConfigValidationError::MissingRequired(format!(
                "job #{} has no name",
                index + 1
            )));
        }

        self.validate().map_err(|e| {
            ConfigValidationError::InvalidValue(format!("job '{}': {}", self.name, e))
        })?;

        match self.backup_kind()? {
            BackupKind::Postgres => match &self.postgres_config {
                None => {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "postgres job '{}' must have configuration",
                        self.name
                    )))
                }
                Some(pg) if pg.host.is_empty() => {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "postgres job '{}' must have a host",
                        self.name
                    )))
                }
                Some(pg) if pg.database.is_empty() => {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "postgres job '{}' must have a database name",
                        self.name
                    )))
                }
                Some(_) => {}
            },
            BackupKind::Mysql => {
                if self
                    .mysql_config
                    .as_ref()
                    .map_or(true, |m| m.connection_string.is_empty())
                {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "mysql job '{}' must have a valid connection string",
                        self.name
                    )));
                }
            }
            BackupKind::Minio => {
                if self
                    .minio_config
                    .as_ref()
                    .map_or(true, |m| m.endpoint.is_empty() || m.bucket_name.is_empty())
                {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "minio job '{}' must have a valid endpoint and bucket name",
                        self.name
                    )));
                }
            }
        }

        self.retention_policy.to_policy().map_err(|e| {
            ConfigValidationError::InvalidValue(format!("job '{}': {}", self.name, e))
        })?;

        if self.notification.enabled {
            if let Some(discord) = &self.notification.discord {
                discord.validate().map_err(|e| {
                    ConfigValidationError::InvalidValue(format!("job '{}': {}", self.name, e))
                })?;
                if let Some(event) = discord
                    .when
                    .iter()
                    .find(|w| !matches!(w.as_str(), "success" | "failure"))
                {
                    return Err(ConfigValidationError::InvalidValue(format!(
                        "job '{}': unknown notification event '{}'",
                        self.name, event
                    )));
                }
            }
            if let Some(webhook) = &self.notification.webhook {
                webhook.validate().map_err(|e| {
                    ConfigValidationError::InvalidValue(format!("job '{}': {}", self.name, e))
                })?;
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_version() -> String {
    "1".to_string()
}
fn default_server_enabled() -> bool {
    true
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> i64 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_run_timeout() -> u64 {
    12 * 60 * 60
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_tick_resolution() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from the YAML file and environment variables.
    ///
    /// The file path comes from `BACKMEUP_CONFIG` (default `config.yml`).
    /// `${VAR}` placeholders in quoted values are expanded first, then
    /// variables with the `BACKMEUP__` prefix override file values
    /// (e.g. `BACKMEUP__SERVER__PORT=9000`).
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let path = expand_home(&path);

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            config::ConfigError::Message(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let content = shared::interpolation::interpolate_env(&raw)
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let config = config::Config::builder()
            .add_source(config::File::from_str(&content, config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix("BACKMEUP").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text, expanding
    /// placeholders with `lookup`. No environment overrides are applied.
    pub fn from_yaml_with<F>(content: &str, lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = shared::interpolation::interpolate_with(content, lookup)
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let cfg: Self = config::Config::builder()
            .add_source(config::File::from_str(&content, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
version: "1"
server:
  enabled: true
  host: "0.0.0.0"
  port: 8080
storage:
  type: local
  local:
    directory: "/var/backups/backmeup"
logging:
  level: info
  format: json
jobs:
  - name: orders
    type: postgres
    postgres_config:
      host: db
      database: orders
    schedule: "0 2 * * *"
    retention_policy:
      type: count
      value: 7
"#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Yaml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.enabled && !(1..=65535).contains(&self.server.port) {
            return Err(ConfigValidationError::InvalidValue(
                "server port must be between 1 and 65535".to_string(),
            ));
        }

        if self.storage.kind != "local" {
            return Err(ConfigValidationError::InvalidValue(format!(
                "unsupported storage type: {}",
                self.storage.kind
            )));
        }
        if self.storage.local.directory.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "local storage directory must be specified".to_string(),
            ));
        }

        if self.scheduler.tick_resolution_ms == 0 || self.scheduler.run_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "scheduler timeouts must be greater than zero".to_string(),
            ));
        }

        if self.jobs.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "at least one job must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            job.validate_job(index)?;
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
        }

        Ok(())
    }

    pub fn storage_root(&self) -> PathBuf {
        expand_home(&self.storage.local.directory)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

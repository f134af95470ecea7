//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::violations::AlertRule;

/// Prefix of environment overrides, e.g. `GATEKEEPER__ENGINE__BACKEND_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Decision engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Policy source configuration
    #[serde(default)]
    pub policies: PoliciesConfig,

    /// Alerting configuration
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Metrics aggregation configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Decision engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on each counter backend call before failing open
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Bound on each violation write
    #[serde(default = "default_violation_write_timeout_ms")]
    pub violation_write_timeout_ms: u64,

    /// How often expired counters and idle burst buckets are dropped
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Violations queued for the alert worker before new ones are dropped
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,

    /// Violation records kept in memory
    #[serde(default = "default_violation_retention")]
    pub violation_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: default_backend_timeout_ms(),
            violation_write_timeout_ms: default_violation_write_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
            alert_queue_capacity: default_alert_queue_capacity(),
            violation_retention: default_violation_retention(),
        }
    }
}

impl EngineConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn violation_write_timeout(&self) -> Duration {
        Duration::from_millis(self.violation_write_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_backend_timeout_ms() -> u64 {
    50
}

fn default_violation_write_timeout_ms() -> u64 {
    100
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_alert_queue_capacity() -> usize {
    1024
}

fn default_violation_retention() -> usize {
    100_000
}

/// Policy source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Path to the YAML policy file
    pub path: Option<String>,

    /// Policy reload interval in seconds, 0 disables periodic reloads
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            path: None,
            reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

/// Alerting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    /// Bound on a single notification delivery
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

/// Metrics aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Length of a reporting bucket
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,

    /// Identifiers and endpoints listed per bucket
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            top_n: default_top_n(),
        }
    }
}

fn default_bucket_secs() -> u64 {
    60
}

fn default_top_n() -> usize {
    10
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,

    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl GatekeeperConfig {
    /// Load configuration from an optional YAML file layered with
    /// `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(Path::new(path)));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.alerts.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

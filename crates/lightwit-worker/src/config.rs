//! Worker configuration types

use lightwit_core::{BlockHeight, LightError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `LIGHTWIT__WORKER__MINT_BUDGET=50`
pub const ENV_PREFIX: &str = "LIGHTWIT";

/// Complete worker configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Scheduling and computation bounds
    #[serde(default)]
    pub worker: WorkerSettings,

    /// NOT_ENOUGH_MINTS retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl WorkerConfig {
    /// Load from an optional TOML file, then apply `LIGHTWIT__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: WorkerConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LightError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        let parsed: WorkerConfig =
            toml::from_str(content).map_err(|e| LightError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LightError::Config(e.to_string()))
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.mint_budget == 0 {
            return Err(LightError::Config("worker.mint_budget must be > 0".into()));
        }
        if self.worker.max_scan_height == 0 {
            return Err(LightError::Config(
                "worker.max_scan_height must be > 0".into(),
            ));
        }
        if self.retry.policy == RetryPolicyKind::Capped && self.retry.max_attempts == 0 {
            return Err(LightError::Config(
                "retry.max_attempts must be > 0 for the capped policy".into(),
            ));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(LightError::Config(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                other
            ))),
        }
    }
}

/// Scheduling and computation bounds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkerSettings {
    /// Pause before every loop iteration (ms)
    #[serde(default = "default_pacing_interval_ms")]
    pub pacing_interval_ms: u64,

    /// Max mints added per computation
    #[serde(default = "default_mint_budget")]
    pub mint_budget: u32,

    /// Max blocks scanned forward from the requested height
    #[serde(default = "default_max_scan_height")]
    pub max_scan_height: u32,

    /// First height where the Zerocoin accumulator exists
    #[serde(default)]
    pub activation_height: BlockHeight,
}

impl WorkerSettings {
    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }
}

fn default_pacing_interval_ms() -> u64 {
    2000
}

fn default_mint_budget() -> u32 {
    100
}

fn default_max_scan_height() -> u32 {
    60 * 24 * 60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            pacing_interval_ms: default_pacing_interval_ms(),
            mint_budget: default_mint_budget(),
            max_scan_height: default_max_scan_height(),
            activation_height: 0,
        }
    }
}

/// Which retry policy handles NOT_ENOUGH_MINTS
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    /// Requeue forever
    #[default]
    Unbounded,
    /// Reject after `max_attempts`
    Capped,
}

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryPolicyKind,

    /// Attempts before the capped policy rejects
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::default(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

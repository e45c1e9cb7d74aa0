//! Application configuration
//!
//! Loaded from an optional JSON file, then overridden by `AURA_*` environment
//! variables. Every field has a default, so an empty file is valid.

use aura_bus::{BusBackend, BusConfig};
use aura_policy::ENGINE_AURA_JSON;
use aura_risk::{RiskConfig, DEFAULT_SPIKE_THRESHOLD, DEFAULT_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "AURA_DATABASE_URL";
pub const ENV_RISK_SPIKE_THRESHOLD: &str = "AURA_RISK_SPIKE_THRESHOLD";
pub const ENV_RISK_WINDOW_SECS: &str = "AURA_RISK_WINDOW_SECS";
pub const ENV_BUS_BACKEND: &str = "AURA_BUS_BACKEND";
pub const ENV_BUS_URL: &str = "AURA_BUS_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// sqlx url of the audit ledger database
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default)]
    pub risk: RiskSettings,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub policy: PolicySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Sliding window length
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// Hits within the window that map to score 100
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: i64,

    /// How often idle state is dropped; 0 disables the pruner
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Engine used when a command does not name one
    #[serde(default = "default_engine")]
    pub default_engine: String,
}

fn default_database_url() -> String {
    "sqlite:aura.db?mode=rwc".to_string()
}

fn default_window_secs() -> i64 {
    DEFAULT_WINDOW_SECS
}

fn default_spike_threshold() -> i64 {
    i64::from(DEFAULT_SPIKE_THRESHOLD)
}

fn default_prune_interval_secs() -> u64 {
    60
}

fn default_engine() -> String {
    ENGINE_AURA_JSON.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            risk: RiskSettings::default(),
            bus: BusConfig::default(),
            policy: PolicySettings::default(),
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            spike_threshold: default_spike_threshold(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            default_engine: default_engine(),
        }
    }
}

impl RiskSettings {
    /// Tracker configuration; non-positive values fall back to the defaults
    pub fn tracker_config(&self) -> RiskConfig {
        RiskConfig::new(self.window_secs, self.spike_threshold)
    }

    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_secs > 0).then(|| Duration::from_secs(self.prune_interval_secs))
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Optional file, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `AURA_*` overrides from `lookup`
    ///
    /// Unparseable numbers are ignored with a warning so a typo in the
    /// environment keeps the previous value. An unknown bus backend is an error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(threshold) = get(ENV_RISK_SPIKE_THRESHOLD).and_then(|v| positive(ENV_RISK_SPIKE_THRESHOLD, &v)) {
            self.risk.spike_threshold = threshold;
        }
        if let Some(window) = get(ENV_RISK_WINDOW_SECS).and_then(|v| positive(ENV_RISK_WINDOW_SECS, &v)) {
            self.risk.window_secs = window;
        }
        if let Some(backend) = get(ENV_BUS_BACKEND) {
            self.bus.backend =
                BusBackend::from_str(&backend).map_err(|_| ConfigError::InvalidValue {
                    key: ENV_BUS_BACKEND.to_string(),
                    value: backend.clone(),
                })?;
        }
        if let Some(url) = get(ENV_BUS_URL) {
            self.bus.url = Some(url);
        }

        Ok(())
    }
}

fn positive(key: &str, value: &str) -> Option<i64> {
    match value.parse::<i64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value, "Ignoring invalid numeric override");
            None
        }
    }
}

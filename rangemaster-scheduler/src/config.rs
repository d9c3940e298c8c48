//! Scheduler configuration
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `RANGEMASTER_*` environment variables, then command line flags.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatcher::DispatcherConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Thresholds consulted by node selectors and range requirements
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOption {
    /// Nodes above this write rate are not picked as balancing endpoints
    pub max_node_write_ops: u64,
    /// Nodes above this storage fill ratio are not picked as balancing endpoints
    pub max_storage_used_ratio: f64,
    /// Ranges whose last heartbeat is older than this are left alone
    pub max_range_heartbeat_age: Duration,
}

impl Default for ScheduleOption {
    fn default() -> Self {
        SchedulerConfig::default().schedule_option()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between leader balance cycles
    pub leader_balance_interval_secs: u64,

    /// Register the leader balance worker at startup
    pub enable_leader_balance: bool,

    /// Write ops/sec above which a node is skipped
    pub max_node_write_ops: u64,

    /// Storage fill ratio (0, 1] above which a node is skipped
    pub max_storage_used_ratio: f64,

    /// Maximum range heartbeat age in seconds for a range to be scheduled
    pub max_range_heartbeat_age_secs: u64,

    /// Pending operator queue capacity
    pub event_queue_capacity: usize,

    /// Timeout for a single leader transfer attempt in seconds
    pub operator_timeout_secs: u64,

    /// Retries after a failed transfer attempt
    pub operator_max_retries: u32,

    /// Delay between transfer attempts in milliseconds
    pub operator_retry_delay_ms: u64,

    /// First id handed out by the id generator
    pub id_seed: u64,

    /// Log operators instead of sending them to storage nodes.
    ///
    /// Reserved until a storage transport is linked into the binary: the
    /// binary only has the dry-run client, so `false` just logs a warning.
    pub dry_run: bool,

    /// Prometheus exporter port
    pub metrics_port: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            leader_balance_interval_secs: 60,
            enable_leader_balance: true,
            max_node_write_ops: 20_000,
            max_storage_used_ratio: 0.9,
            max_range_heartbeat_age_secs: 120,
            event_queue_capacity: 1024,
            operator_timeout_secs: 30,
            operator_max_retries: 2,
            operator_retry_delay_ms: 500,
            id_seed: 1,
            dry_run: true,
            metrics_port: 9100,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Overlay `RANGEMASTER_*` environment variables that are set
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse("RANGEMASTER_LEADER_BALANCE_INTERVAL")? {
            self.leader_balance_interval_secs = v;
        }
        if let Some(v) = env_bool("RANGEMASTER_ENABLE_LEADER_BALANCE") {
            self.enable_leader_balance = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_MAX_NODE_WRITE_OPS")? {
            self.max_node_write_ops = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_MAX_STORAGE_USED_RATIO")? {
            self.max_storage_used_ratio = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_MAX_RANGE_HB_AGE")? {
            self.max_range_heartbeat_age_secs = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_EVENT_QUEUE_CAPACITY")? {
            self.event_queue_capacity = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_OPERATOR_TIMEOUT")? {
            self.operator_timeout_secs = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_OPERATOR_MAX_RETRIES")? {
            self.operator_max_retries = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_OPERATOR_RETRY_DELAY_MS")? {
            self.operator_retry_delay_ms = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_ID_SEED")? {
            self.id_seed = v;
        }
        if let Some(v) = env_bool("RANGEMASTER_DRY_RUN") {
            self.dry_run = v;
        }
        if let Some(v) = env_parse("RANGEMASTER_METRICS_PORT")? {
            self.metrics_port = v;
        }
        Ok(())
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leader_balance_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "leader_balance_interval_secs".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "event_queue_capacity".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        if self.operator_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "operator_timeout_secs".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        if !(self.max_storage_used_ratio > 0.0 && self.max_storage_used_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "max_storage_used_ratio".to_string(),
                format!("{} is outside (0, 1]", self.max_storage_used_ratio),
            ));
        }
        Ok(())
    }

    /// Get leader balance interval as Duration
    pub fn leader_balance_interval(&self) -> Duration {
        Duration::from_secs(self.leader_balance_interval_secs)
    }

    pub fn schedule_option(&self) -> ScheduleOption {
        ScheduleOption {
            max_node_write_ops: self.max_node_write_ops,
            max_storage_used_ratio: self.max_storage_used_ratio,
            max_range_heartbeat_age: Duration::from_secs(self.max_range_heartbeat_age_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            operator_timeout: Duration::from_secs(self.operator_timeout_secs),
            max_retries: self.operator_max_retries,
            retry_delay: Duration::from_millis(self.operator_retry_delay_ms),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), v)),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "true" || v == "1")
}

//! vmsched.toml configuration parser.
//!
//! Every field has a default so an empty file (or no file) yields a working
//! single-node configuration. The parsed value is handed to constructors
//! explicitly; nothing reads it from ambient state at call time.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmschedConfig {
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Driver selected at process start: `"filter"` or `"base"`.
    pub driver: String,
    /// Service name used as notification publisher and event prefix.
    pub service_name: String,
    /// Topic compute services register under.
    pub compute_topic: String,
    /// Maximum placement attempts for one instance (1 disables retry).
    pub max_attempts: u32,
    /// Live-migration destination retries; negative means unlimited.
    pub migrate_max_retries: i32,
    /// Seconds without a heartbeat before a service counts as down.
    pub service_down_time_secs: u64,
    pub periodic_task_interval_secs: u64,
    pub reservation_expire_interval_secs: u64,
    pub filters: FilterConfig,
    pub weights: WeightConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            driver: "filter".to_string(),
            service_name: "scheduler".to_string(),
            compute_topic: "compute".to_string(),
            max_attempts: 3,
            migrate_max_retries: -1,
            service_down_time_secs: 60,
            periodic_task_interval_secs: 60,
            reservation_expire_interval_secs: 60,
            filters: FilterConfig::default(),
            weights: WeightConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// `None` when live-migration retries are unbounded.
    pub fn migrate_retry_limit(&self) -> Option<u32> {
        u32::try_from(self.migrate_max_retries).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Filter names, applied in order after the retry filter.
    pub enabled: Vec<String>,
    pub ram_allocation_ratio: f64,
    pub cpu_allocation_ratio: f64,
    pub disk_allocation_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: [
                "RetryFilter",
                "AvailabilityZoneFilter",
                "RamFilter",
                "CoreFilter",
                "DiskFilter",
                "ComputeFilter",
                "ImagePropertiesFilter",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            ram_allocation_ratio: 1.5,
            cpu_allocation_ratio: 16.0,
            disk_allocation_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub ram_weight_multiplier: f64,
    pub vcpu_weight_multiplier: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            ram_weight_multiplier: 1.0,
            vcpu_weight_multiplier: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8774)),
            data_dir: PathBuf::from("/var/lib/vmsched"),
        }
    }
}

impl VmschedConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: VmschedConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.max_attempts == 0 {
            return Err(ConfigError::Invalid("scheduler.max_attempts must be >= 1".into()));
        }
        if s.periodic_task_interval_secs == 0 || s.reservation_expire_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler task intervals must be >= 1".into()));
        }
        let f = &s.filters;
        for (name, ratio) in [
            ("ram_allocation_ratio", f.ram_allocation_ratio),
            ("cpu_allocation_ratio", f.cpu_allocation_ratio),
            ("disk_allocation_ratio", f.disk_allocation_ratio),
        ] {
            if !(ratio > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "scheduler.filters.{name} must be positive, got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

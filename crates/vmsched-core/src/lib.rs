pub mod config;
pub mod types;

pub use config::{ConfigError, FilterConfig, SchedulerConfig, ServerConfig, VmschedConfig, WeightConfig};
pub use types::*;

//! Configuration for slurmq.
//!
//! Cluster quota settings, thresholds and enforcement policy, loaded from a
//! TOML file with `SLURMQ_*` environment overrides.

pub mod load;
pub mod types;

pub use load::{
    CONFIG_ENV, ConfigError, ConfigPaths, LOG_ENV, apply_env_overrides, default_config_path_with,
};
pub use types::{
    CancelOrder, ClusterConfig, ConfigIssue, DisplayConfig, EnforcementConfig, MonitoringConfig,
    OutputFormat, SlurmqConfig,
};

//! Configuration types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single cluster's quota settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Display name
    pub name: String,

    /// Slurm account to query (empty = any)
    pub account: String,

    /// QoS names; the first entry is the default target QoS
    pub qos: Vec<String>,

    /// Partitions; the first entry is passed to sacct when set
    pub partitions: Vec<String>,

    /// Quota limit in GPU-hours over the rolling window
    pub quota_limit: u32,

    /// Rolling window length in days
    pub rolling_window_days: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            account: String::new(),
            qos: vec!["normal".to_string()],
            partitions: Vec::new(),
            quota_limit: 500,
            rolling_window_days: 30,
        }
    }
}

impl ClusterConfig {
    /// Create a cluster with the given display name and default quota settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The QoS used when a caller does not name one.
    pub fn default_qos(&self) -> Option<&str> {
        self.qos.first().map(String::as_str)
    }

    /// The partition passed to sacct when a caller does not name one.
    pub fn default_partition(&self) -> Option<&str> {
        self.partitions.first().map(String::as_str)
    }
}

/// Usage classification thresholds and monitor cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub check_interval_minutes: u32,
    /// Usage fraction at which a user is flagged as warning
    pub warning_threshold: f64,
    /// Usage fraction at which a user is flagged as exceeded
    pub critical_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 30,
            warning_threshold: 0.8,
            critical_threshold: 1.0,
        }
    }
}

/// Order in which an over-quota user's active jobs are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelOrder {
    /// Newest job first
    #[default]
    Lifo,
    /// Oldest job first
    Fifo,
}

/// Admin enforcement policy.
///
/// Defaults are deliberately inert: enforcement is off and, when turned on,
/// starts in dry-run mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub enabled: bool,
    pub dry_run: bool,
    /// Hours after first exceeding the quota during which nothing is cancelled
    pub grace_period_hours: u32,
    pub cancel_order: CancelOrder,
    pub exempt_users: Vec<String>,
    pub exempt_job_prefixes: Vec<String>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            grace_period_hours: 24,
            cancel_order: CancelOrder::Lifo,
            exempt_users: Vec::new(),
            exempt_job_prefixes: Vec::new(),
        }
    }
}

impl EnforcementConfig {
    pub fn is_exempt_user(&self, user: &str) -> bool {
        self.exempt_users.iter().any(|u| u == user)
    }

    /// Whether a job name starts with any configured exempt prefix.
    pub fn is_exempt_job(&self, job_name: &str) -> bool {
        self.exempt_job_prefixes
            .iter()
            .any(|prefix| job_name.starts_with(prefix.as_str()))
    }
}

/// Default rendering of command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Colored tables
    #[default]
    Rich,
    /// Tables without color or styling
    Plain,
    Json,
}

/// Output preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub color: bool,
    pub output_format: OutputFormat,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            output_format: OutputFormat::Rich,
        }
    }
}

impl DisplayConfig {
    /// Color is on only when enabled and the format is `rich`.
    pub fn use_color(&self) -> bool {
        self.color && self.output_format == OutputFormat::Rich
    }
}

/// Top-level slurmq configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmqConfig {
    /// Key into `clusters` used when no cluster is named
    pub default_cluster: String,
    pub clusters: BTreeMap<String, ClusterConfig>,
    pub monitoring: MonitoringConfig,
    pub enforcement: EnforcementConfig,
    pub display: DisplayConfig,
}

/// A problem found by [`SlurmqConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigIssue {
    #[error("default_cluster '{0}' is not defined under [clusters]")]
    UndefinedDefaultCluster(String),
    #[error("cluster '{0}' has an empty qos list")]
    EmptyQos(String),
    #[error("cluster '{0}' has quota_limit = 0; usage will always read as 0%")]
    ZeroQuota(String),
    #[error("cluster '{0}' has rolling_window_days = 0")]
    ZeroWindow(String),
    #[error("warning_threshold ({warning}) must be positive and not above critical_threshold ({critical})")]
    ThresholdOrder { warning: f64, critical: f64 },
}

impl ConfigIssue {
    /// Warnings do not make a config invalid.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ZeroQuota(_))
    }
}

impl SlurmqConfig {
    /// Names of all configured clusters.
    pub fn cluster_names(&self) -> Vec<&str> {
        self.clusters.keys().map(String::as_str).collect()
    }

    /// Look up a cluster by key, falling back to `default_cluster`.
    pub fn get_cluster(&self, name: Option<&str>) -> Result<&ClusterConfig, crate::ConfigError> {
        let key = match name {
            Some(n) => n,
            None if !self.default_cluster.is_empty() => self.default_cluster.as_str(),
            None => return Err(crate::ConfigError::NoClusterSelected),
        };

        self.clusters
            .get(key)
            .ok_or_else(|| crate::ConfigError::UnknownCluster {
                name: key.to_string(),
                known: self.cluster_names().join(", "),
            })
    }

    /// Check the config for problems the loader cannot catch.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !self.default_cluster.is_empty() && !self.clusters.contains_key(&self.default_cluster) {
            issues.push(ConfigIssue::UndefinedDefaultCluster(
                self.default_cluster.clone(),
            ));
        }

        for (key, cluster) in &self.clusters {
            if cluster.qos.is_empty() {
                issues.push(ConfigIssue::EmptyQos(key.clone()));
            }
            if cluster.quota_limit == 0 {
                issues.push(ConfigIssue::ZeroQuota(key.clone()));
            }
            if cluster.rolling_window_days == 0 {
                issues.push(ConfigIssue::ZeroWindow(key.clone()));
            }
        }

        let warning = self.monitoring.warning_threshold;
        let critical = self.monitoring.critical_threshold;
        if warning <= 0.0 || warning > critical {
            issues.push(ConfigIssue::ThresholdOrder { warning, critical });
        }

        issues
    }

    /// Whether [`validate`](Self::validate) found anything other than warnings.
    pub fn is_valid(&self) -> bool {
        self.validate().iter().all(ConfigIssue::is_warning)
    }
}

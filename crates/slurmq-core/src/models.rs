//! Job and usage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slurm job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Completed,
    Running,
    Pending,
    Cancelled,
    Failed,
    Timeout,
    OutOfMemory,
    NodeFail,
    Preempted,
    Suspended,
    Requeued,
    BootFail,
    Deadline,
    Resizing,
    Revoked,
    #[default]
    Unknown,
}

impl JobState {
    /// Parse a Slurm state string.
    ///
    /// Accepts full names and squeue abbreviations ("CD", "R", "PD", ...).
    /// Only the first whitespace-delimited token counts, so
    /// "CANCELLED by 12345" parses as `Cancelled`. Anything unrecognized is
    /// `Unknown`.
    pub fn from_slurm(s: &str) -> Self {
        let base_state = s.split_whitespace().next().unwrap_or_default();

        match base_state.to_uppercase().as_str() {
            "COMPLETED" | "CD" => Self::Completed,
            "RUNNING" | "R" => Self::Running,
            "PENDING" | "PD" => Self::Pending,
            "CANCELLED" | "CA" => Self::Cancelled,
            "FAILED" | "F" => Self::Failed,
            "TIMEOUT" | "TO" => Self::Timeout,
            "OUT_OF_MEMORY" | "OOM" => Self::OutOfMemory,
            "NODE_FAIL" | "NF" => Self::NodeFail,
            "PREEMPTED" | "PR" => Self::Preempted,
            "SUSPENDED" | "S" => Self::Suspended,
            "REQUEUED" | "RQ" => Self::Requeued,
            "BOOT_FAIL" | "BF" => Self::BootFail,
            "DEADLINE" | "DL" => Self::Deadline,
            "RESIZING" | "RS" => Self::Resizing,
            "REVOKED" | "RV" => Self::Revoked,
            _ => Self::Unknown,
        }
    }

    /// Canonical Slurm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Running => "RUNNING",
            Self::Pending => "PENDING",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::NodeFail => "NODE_FAIL",
            Self::Preempted => "PREEMPTED",
            Self::Suspended => "SUSPENDED",
            Self::Requeued => "REQUEUED",
            Self::BootFail => "BOOT_FAIL",
            Self::Deadline => "DEADLINE",
            Self::Resizing => "RESIZING",
            Self::Revoked => "REVOKED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Job is active (running or queued).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Pending)
    }

    /// Job ended with a problem worth highlighting.
    pub fn is_problematic(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Timeout
                | Self::OutOfMemory
                | Self::NodeFail
                | Self::Preempted
                | Self::BootFail
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota usage level. Ordered `Ok < Warning < Exceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Ok,
    Warning,
    Exceeded,
}

impl QuotaStatus {
    pub const DEFAULT_WARNING: f64 = 0.8;
    pub const DEFAULT_CRITICAL: f64 = 1.0;

    /// Classify a usage fraction. Both thresholds are inclusive.
    pub fn from_usage(percentage: f64, warning: f64, critical: f64) -> Self {
        if percentage >= critical {
            Self::Exceeded
        } else if percentage >= warning {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Exceeded => "exceeded",
        }
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One job allocation from Slurm accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: u64,
    pub name: String,
    pub user: String,
    pub qos: String,
    pub account: String,
    /// Allocated GPUs
    pub n_gpus: u32,
    pub elapsed_seconds: u64,
    /// `DateTime::<Utc>::MIN_UTC` when Slurm reported no start time
    pub start_time: DateTime<Utc>,
    /// `DateTime::<Utc>::MIN_UTC` when Slurm reported no submission time
    pub submission_time: DateTime<Utc>,
    pub state: JobState,
    pub allocation_nodes: u32,
    pub n_cpus: u32,
    /// CPU time used across all steps
    pub cpu_seconds: u64,
    /// Requested memory in sacct notation (e.g. "32G", "4000Mc")
    pub req_mem: String,
    /// Peak RSS across steps, in bytes
    pub max_rss: u64,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            job_id: 0,
            name: String::new(),
            user: String::new(),
            qos: String::new(),
            account: String::new(),
            n_gpus: 0,
            elapsed_seconds: 0,
            start_time: DateTime::<Utc>::MIN_UTC,
            submission_time: DateTime::<Utc>::MIN_UTC,
            state: JobState::Unknown,
            allocation_nodes: 1,
            n_cpus: 0,
            cpu_seconds: 0,
            req_mem: String::new(),
            max_rss: 0,
        }
    }
}

impl JobRecord {
    /// Allocated GPU-hours: GPUs × elapsed wall-clock hours, not utilization.
    pub fn gpu_hours(&self) -> f64 {
        (self.n_gpus as f64 * self.elapsed_seconds as f64) / 3600.0
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_problematic(&self) -> bool {
        self.state.is_problematic()
    }
}

/// A user's usage against one cluster quota and QoS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub user: String,
    pub qos: String,
    pub used_gpu_hours: f64,
    pub quota_limit: u32,
    pub rolling_window_days: u32,
    /// Running or pending jobs counted in `used_gpu_hours`
    pub active_jobs: Vec<JobRecord>,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
}

impl UsageReport {
    /// Build a report with the default 0.8 / 1.0 thresholds and no active jobs.
    pub fn new(
        user: impl Into<String>,
        qos: impl Into<String>,
        used_gpu_hours: f64,
        quota_limit: u32,
        rolling_window_days: u32,
    ) -> Self {
        Self {
            user: user.into(),
            qos: qos.into(),
            used_gpu_hours,
            quota_limit,
            rolling_window_days,
            active_jobs: Vec::new(),
            warning_threshold: QuotaStatus::DEFAULT_WARNING,
            critical_threshold: QuotaStatus::DEFAULT_CRITICAL,
        }
    }

    pub fn remaining_gpu_hours(&self) -> f64 {
        self.quota_limit as f64 - self.used_gpu_hours
    }

    /// Usage as a fraction of the quota. A zero quota reads as 0.0.
    pub fn usage_percentage(&self) -> f64 {
        if self.quota_limit == 0 {
            return 0.0;
        }
        self.used_gpu_hours / self.quota_limit as f64
    }

    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_usage(
            self.usage_percentage(),
            self.warning_threshold,
            self.critical_threshold,
        )
    }
}

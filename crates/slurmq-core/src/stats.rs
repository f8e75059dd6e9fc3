//! Cluster-wide utilization and queue wait statistics.
//!
//! Jobs are grouped by the partition or QoS they were queried under, then
//! split into small and large by GPU-hours.

use crate::models::JobRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use slurmq_config::ClusterConfig;
use thiserror::Error;

/// Jobs shorter than this are left out.
pub const MIN_ELAPSED_SECONDS: u64 = 600;

/// Jobs that waited longer than this are treated as bad data and left out.
pub const MAX_WAIT_SECONDS: i64 = 31 * 24 * 3600;

/// A wait above this many hours counts as long.
pub const LONG_WAIT_HOURS: f64 = 6.0;

/// Default GPU-hour boundary between small and large jobs.
pub const DEFAULT_SMALL_THRESHOLD: f64 = 50.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("No partitions or QoS configured. Use --partition or --qos.")]
    NoGroups,
}

/// What a set of statistics was queried by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    Partition(String),
    Qos(String),
}

impl GroupKey {
    pub fn name(&self) -> &str {
        match self {
            Self::Partition(name) | Self::Qos(name) => name,
        }
    }

    pub fn partition(&self) -> Option<&str> {
        match self {
            Self::Partition(name) => Some(name),
            Self::Qos(_) => None,
        }
    }

    pub fn qos(&self) -> Option<&str> {
        match self {
            Self::Qos(name) => Some(name),
            Self::Partition(_) => None,
        }
    }
}

/// Pick the groups to analyse: explicit partitions, else explicit QoS, else
/// the cluster's partitions, else its QoS.
pub fn stats_groups(
    partitions: &[String],
    qos: &[String],
    cluster: Option<&ClusterConfig>,
) -> Result<Vec<GroupKey>, StatsError> {
    let groups: Vec<GroupKey> = if !partitions.is_empty() {
        partitions.iter().cloned().map(GroupKey::Partition).collect()
    } else if !qos.is_empty() {
        qos.iter().cloned().map(GroupKey::Qos).collect()
    } else {
        match cluster {
            Some(c) if !c.partitions.is_empty() => {
                c.partitions.iter().cloned().map(GroupKey::Partition).collect()
            }
            Some(c) => c.qos.iter().cloned().map(GroupKey::Qos).collect(),
            None => Vec::new(),
        }
    };

    if groups.is_empty() {
        return Err(StatsError::NoGroups);
    }
    Ok(groups)
}

/// The figures one job contributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSample {
    pub gpu_hours: f64,
    pub wait_hours: f64,
}

fn is_set(t: DateTime<Utc>) -> bool {
    t != DateTime::<Utc>::MIN_UTC
}

impl JobSample {
    /// `None` for jobs without GPUs, shorter than [`MIN_ELAPSED_SECONDS`], or
    /// waiting longer than [`MAX_WAIT_SECONDS`].
    pub fn from_record(record: &JobRecord) -> Option<Self> {
        if record.n_gpus == 0 || record.elapsed_seconds < MIN_ELAPSED_SECONDS {
            return None;
        }

        let wait_seconds = if is_set(record.start_time) && is_set(record.submission_time) {
            (record.start_time - record.submission_time)
                .num_seconds()
                .max(0)
        } else {
            0
        };
        if wait_seconds > MAX_WAIT_SECONDS {
            return None;
        }

        Some(Self {
            gpu_hours: record.gpu_hours(),
            wait_hours: wait_seconds as f64 / 3600.0,
        })
    }

    pub fn is_small(&self, threshold: f64) -> bool {
        self.gpu_hours <= threshold
    }
}

pub fn samples(records: &[JobRecord]) -> Vec<JobSample> {
    records.iter().filter_map(JobSample::from_record).collect()
}

/// Median of `values`, averaging the middle pair for even lengths. Empty is 0.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Summary of a set of jobs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GroupStats {
    pub job_count: usize,
    pub gpu_hours: f64,
    pub median_wait_hours: f64,
    pub long_wait_count: usize,
    pub long_wait_pct: f64,
}

impl GroupStats {
    pub fn from_samples<'s, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'s JobSample>,
    {
        let mut waits = Vec::new();
        let mut gpu_hours = 0.0;
        for sample in samples {
            gpu_hours += sample.gpu_hours;
            waits.push(sample.wait_hours);
        }

        let job_count = waits.len();
        if job_count == 0 {
            return Self::default();
        }

        let long_wait_count = waits.iter().filter(|&&w| w > LONG_WAIT_HOURS).count();
        Self {
            job_count,
            gpu_hours,
            median_wait_hours: median(&mut waits),
            long_wait_count,
            long_wait_pct: long_wait_count as f64 / job_count as f64 * 100.0,
        }
    }
}

/// Statistics for all jobs of a group and for its small and large jobs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SizeBreakdown {
    pub all: GroupStats,
    pub small: GroupStats,
    pub large: GroupStats,
}

impl SizeBreakdown {
    /// `small_threshold` is inclusive: a job at exactly the threshold is small.
    pub fn new(samples: &[JobSample], small_threshold: f64) -> Self {
        let (small, large): (Vec<JobSample>, Vec<JobSample>) =
            samples.iter().copied().partition(|s| s.is_small(small_threshold));
        Self {
            all: GroupStats::from_samples(samples),
            small: GroupStats::from_samples(&small),
            large: GroupStats::from_samples(&large),
        }
    }
}

/// One group's statistics for the current period and, when compared, the
/// period before it.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub group: GroupKey,
    pub current: SizeBreakdown,
    pub previous: Option<SizeBreakdown>,
}

/// Relative change from `previous` to `current` in percent; `None` when
/// `previous` is zero.
pub fn pct_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let pct = (current - previous) / previous * 100.0;
    pct.is_finite().then_some(pct)
}

/// Hours as "< 1min", "15min", "2h" or "1h15".
pub fn format_time_human(hours: f64) -> String {
    if hours * 60.0 < 1.0 {
        return "< 1min".to_string();
    }

    let mut h = hours.trunc() as u64;
    let mut minutes = ((hours - hours.trunc()) * 60.0).round() as u64;
    if minutes == 60 {
        h += 1;
        minutes = 0;
    }

    match (h, minutes) {
        (0, m) => format!("{m}min"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h{m:02}"),
    }
}

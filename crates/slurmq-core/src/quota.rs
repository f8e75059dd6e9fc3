//! Rolling-window GPU-hour accounting against a cluster quota.

use crate::clock::{Clock, SystemClock};
use crate::models::{JobRecord, QuotaStatus, UsageReport};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::Serialize;
use slurmq_config::ClusterConfig;
use thiserror::Error;

/// Forecast horizons used when the caller does not pick any.
pub const DEFAULT_FORECAST_HOURS: [u32; 4] = [12, 24, 72, 168];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("cluster '{cluster}' has no QoS configured and none was given")]
    NoQos { cluster: String },
}

/// Quota available at a point in the future.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaForecast {
    pub hours_ahead: u32,
    pub available_gpu_hours: f64,
}

/// Sum of allocated GPU-hours. An empty set sums to 0.0.
pub fn calculate_gpu_hours<'r, I>(records: I) -> f64
where
    I: IntoIterator<Item = &'r JobRecord>,
{
    records
        .into_iter()
        .fold(0.0, |total, record| total + record.gpu_hours())
}

/// Keep records that started at or after `cutoff`.
pub fn filter_by_cutoff<'r, I>(records: I, cutoff: DateTime<Utc>) -> Vec<&'r JobRecord>
where
    I: IntoIterator<Item = &'r JobRecord>,
{
    records
        .into_iter()
        .filter(|r| r.start_time >= cutoff)
        .collect()
}

/// Keep records belonging to `user`.
pub fn filter_by_user<'r, I>(records: I, user: &str) -> Vec<&'r JobRecord>
where
    I: IntoIterator<Item = &'r JobRecord>,
{
    records.into_iter().filter(|r| r.user == user).collect()
}

fn saturating_sub(t: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    t.checked_sub_signed(delta)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn saturating_add(t: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    t.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Checks GPU quota usage against a cluster configuration.
#[derive(Debug, Clone)]
pub struct QuotaChecker<C = SystemClock> {
    cluster: ClusterConfig,
    warning_threshold: f64,
    critical_threshold: f64,
    clock: C,
}

impl QuotaChecker<SystemClock> {
    /// Checker with default thresholds reading the system clock.
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            cluster,
            warning_threshold: QuotaStatus::DEFAULT_WARNING,
            critical_threshold: QuotaStatus::DEFAULT_CRITICAL,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> QuotaChecker<C> {
    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    /// Swap the time source.
    pub fn with_clock<D: Clock>(self, clock: D) -> QuotaChecker<D> {
        QuotaChecker {
            cluster: self.cluster,
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
            clock,
        }
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The QoS to account against: `qos` if given, else the cluster's first.
    pub fn target_qos<'q>(&'q self, qos: Option<&'q str>) -> Result<&'q str, QuotaError> {
        match qos {
            Some(q) => Ok(q),
            None => self.cluster.default_qos().ok_or_else(|| QuotaError::NoQos {
                cluster: self.cluster.name.clone(),
            }),
        }
    }

    /// Lower bound of the rolling window ending now.
    ///
    /// Whole seconds, so the same instant can be passed to sacct as `-S`.
    pub fn window_cutoff(&self, window_days: Option<u32>) -> DateTime<Utc> {
        let days = window_days.unwrap_or(self.cluster.rolling_window_days);
        saturating_sub(self.now(), TimeDelta::days(i64::from(days))).trunc_subsecs(0)
    }

    /// Keep records that started inside the rolling window.
    pub fn filter_by_window<'r, I>(
        &self,
        records: I,
        window_days: Option<u32>,
    ) -> Vec<&'r JobRecord>
    where
        I: IntoIterator<Item = &'r JobRecord>,
    {
        filter_by_cutoff(records, self.window_cutoff(window_days))
    }

    /// Keep records whose QoS matches exactly (case-sensitive).
    pub fn filter_by_qos<'r, I>(
        &self,
        records: I,
        qos: Option<&str>,
    ) -> Result<Vec<&'r JobRecord>, QuotaError>
    where
        I: IntoIterator<Item = &'r JobRecord>,
    {
        let target = self.target_qos(qos)?;
        Ok(records.into_iter().filter(|r| r.qos == target).collect())
    }

    /// Usage report for one user: filtered by user, then window, then QoS.
    pub fn generate_report(
        &self,
        user: &str,
        records: &[JobRecord],
        qos: Option<&str>,
    ) -> Result<UsageReport, QuotaError> {
        let target_qos = self.target_qos(qos)?;

        let user_records = filter_by_user(records, user);
        let windowed = self.filter_by_window(user_records, None);
        let qos_filtered = self.filter_by_qos(windowed, Some(target_qos))?;

        let used_gpu_hours = calculate_gpu_hours(qos_filtered.iter().copied());
        let active_jobs: Vec<JobRecord> = qos_filtered
            .iter()
            .filter(|r| r.is_running())
            .map(|r| (*r).clone())
            .collect();

        tracing::debug!(
            user,
            qos = target_qos,
            used_gpu_hours,
            jobs = qos_filtered.len(),
            active = active_jobs.len(),
            "generated usage report"
        );

        Ok(UsageReport {
            user: user.to_string(),
            qos: target_qos.to_string(),
            used_gpu_hours,
            quota_limit: self.cluster.quota_limit,
            rolling_window_days: self.cluster.rolling_window_days,
            active_jobs,
            warning_threshold: self.warning_threshold,
            critical_threshold: self.critical_threshold,
        })
    }

    /// Quota available `h` hours from now for each horizon, as jobs age out
    /// of the window.
    ///
    /// Each horizon is evaluated from the user's full QoS-matched record set
    /// against `now + h - window_days`, not on top of the current window.
    pub fn forecast_quota(
        &self,
        user: &str,
        records: &[JobRecord],
        hours_ahead: &[u32],
        qos: Option<&str>,
    ) -> Result<Vec<QuotaForecast>, QuotaError> {
        let user_records = filter_by_user(records, user);
        let qos_filtered = self.filter_by_qos(user_records, qos)?;

        let now = self.now();
        let window = TimeDelta::days(i64::from(self.cluster.rolling_window_days));
        let quota_limit = f64::from(self.cluster.quota_limit);

        Ok(hours_ahead
            .iter()
            .map(|&hours| {
                let ahead = saturating_add(now, TimeDelta::hours(i64::from(hours)));
                let future_cutoff = saturating_sub(ahead, window);
                let still_counted = filter_by_cutoff(qos_filtered.iter().copied(), future_cutoff);
                let future_usage = calculate_gpu_hours(still_counted);
                QuotaForecast {
                    hours_ahead: hours,
                    available_gpu_hours: quota_limit - future_usage,
                }
            })
            .collect())
    }
}

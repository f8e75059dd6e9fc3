//! Per-user status across a full accounting snapshot.

use crate::clock::Clock;
use crate::exceeded::{find_exceeded_timestamp, in_grace_period};
use crate::models::{JobRecord, QuotaStatus, UsageReport};
use crate::quota::{QuotaChecker, QuotaError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A user with active jobs, as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStatus {
    pub report: UsageReport,
    pub in_grace_period: bool,
    /// When cumulative usage first crossed the quota (only for exceeded users)
    pub exceeded_at: Option<DateTime<Utc>>,
}

impl UserStatus {
    pub fn user(&self) -> &str {
        &self.report.user
    }

    pub fn status(&self) -> QuotaStatus {
        self.report.status()
    }

    pub fn active_jobs(&self) -> &[JobRecord] {
        &self.report.active_jobs
    }

    pub fn should_warn(&self) -> bool {
        self.status() == QuotaStatus::Warning || self.in_grace_period
    }

    pub fn should_cancel(&self) -> bool {
        self.status() == QuotaStatus::Exceeded && !self.in_grace_period
    }
}

/// A usage row for the all-users report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserUsage {
    pub report: UsageReport,
    /// Jobs in the snapshot for this user, before any filtering
    pub total_jobs: usize,
}

fn group_by_user(records: &[JobRecord]) -> BTreeMap<&str, Vec<JobRecord>> {
    let mut users: BTreeMap<&str, Vec<JobRecord>> = BTreeMap::new();
    for record in records {
        users
            .entry(record.user.as_str())
            .or_default()
            .push(record.clone());
    }
    users
}

fn by_usage_descending(a: &UsageReport, b: &UsageReport) -> std::cmp::Ordering {
    b.used_gpu_hours.total_cmp(&a.used_gpu_hours)
}

/// Status of every user who has active jobs in their quota window, sorted by
/// usage, highest first.
///
/// Grace-period membership is only computed for exceeded users; the crossing
/// time comes from that user's full record history.
pub fn get_all_user_statuses<C: Clock>(
    records: &[JobRecord],
    checker: &QuotaChecker<C>,
    grace_period_hours: u32,
) -> Result<Vec<UserStatus>, QuotaError> {
    let now = checker.now();
    let mut results = Vec::new();

    for (user, user_records) in group_by_user(records) {
        let report = checker.generate_report(user, &user_records, None)?;
        if report.active_jobs.is_empty() {
            continue;
        }

        let mut exceeded_at = None;
        let mut in_grace = false;

        if report.status() == QuotaStatus::Exceeded {
            exceeded_at = find_exceeded_timestamp(&user_records, f64::from(report.quota_limit));
            if let Some(at) = exceeded_at {
                in_grace = in_grace_period(at, now, grace_period_hours);
            }
            tracing::debug!(user, ?exceeded_at, in_grace, "user over quota");
        }

        results.push(UserStatus {
            report,
            in_grace_period: in_grace,
            exceeded_at,
        });
    }

    results.sort_by(|a, b| by_usage_descending(&a.report, &b.report));
    Ok(results)
}

/// One usage row per user in the snapshot, sorted by usage, highest first.
pub fn aggregate_by_user<C: Clock>(
    records: &[JobRecord],
    checker: &QuotaChecker<C>,
    qos: Option<&str>,
) -> Result<Vec<UserUsage>, QuotaError> {
    let mut results = Vec::new();

    for (user, user_records) in group_by_user(records) {
        let report = checker.generate_report(user, &user_records, qos)?;
        results.push(UserUsage {
            report,
            total_jobs: user_records.len(),
        });
    }

    results.sort_by(|a, b| by_usage_descending(&a.report, &b.report));
    Ok(results)
}

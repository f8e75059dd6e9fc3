//! Quota enforcement policy.
//!
//! Decides a disposition for every active job of every over-quota user and
//! requests cancellation for the jobs that have no exemption.

use crate::models::{JobRecord, QuotaStatus};
use crate::status::UserStatus;
use serde::Serialize;
use slurmq_config::{CancelOrder, EnforcementConfig};
use std::fmt;
use std::future::Future;

/// What enforcement did (or would do) with one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// User exceeded recently; warn only
    GracePeriod,
    ExemptUser,
    ExemptPrefix,
    /// Dry-run: would have been cancelled
    WouldCancel,
    /// Cancellation was requested
    Cancelled,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GracePeriod => "grace_period",
            Self::ExemptUser => "exempt_user",
            Self::ExemptPrefix => "exempt_prefix",
            Self::WouldCancel => "would_cancel",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking the scheduler to cancel a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum CancelOutcome {
    Cancelled,
    /// The job finished or was cancelled before we got to it
    AlreadyGone,
    Failed(String),
}

impl CancelOutcome {
    /// The job is no longer running, either way.
    pub fn acted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::AlreadyGone)
    }
}

/// Cancels jobs on the scheduler.
pub trait JobCanceller {
    /// Must not fail when the job is already gone; report it as
    /// [`CancelOutcome::AlreadyGone`] instead.
    fn cancel(&self, job_id: u64) -> impl Future<Output = CancelOutcome> + Send;
}

/// One enforcement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnforcementAction {
    pub user: String,
    pub job_id: u64,
    pub job_name: String,
    pub disposition: Disposition,
    /// Set only for [`Disposition::Cancelled`]
    pub outcome: Option<CancelOutcome>,
}

impl EnforcementAction {
    /// Whether a cancellation actually took effect.
    pub fn did_cancel(&self) -> bool {
        self.outcome.as_ref().is_some_and(CancelOutcome::acted)
    }
}

/// Active jobs in the order enforcement processes them.
fn ordered_jobs(jobs: &[JobRecord], order: CancelOrder) -> Vec<&JobRecord> {
    let mut ordered: Vec<&JobRecord> = jobs.iter().collect();
    match order {
        CancelOrder::Lifo => ordered.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.job_id.cmp(&a.job_id))
        }),
        CancelOrder::Fifo => ordered.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.job_id.cmp(&b.job_id))
        }),
    }
    ordered
}

/// Decide dispositions without touching the scheduler.
///
/// Jobs that would be cancelled in live mode come back as
/// [`Disposition::Cancelled`] with no outcome; in dry-run mode they are
/// [`Disposition::WouldCancel`].
pub fn plan_enforcement(
    statuses: &[UserStatus],
    config: &EnforcementConfig,
) -> Vec<EnforcementAction> {
    let mut actions = Vec::new();

    for status in statuses {
        if status.status() != QuotaStatus::Exceeded {
            continue;
        }

        let user_level = if status.in_grace_period {
            Some(Disposition::GracePeriod)
        } else if config.is_exempt_user(status.user()) {
            Some(Disposition::ExemptUser)
        } else {
            None
        };

        for job in ordered_jobs(status.active_jobs(), config.cancel_order) {
            let disposition = match user_level {
                Some(d) => d,
                None if config.is_exempt_job(&job.name) => Disposition::ExemptPrefix,
                None if config.dry_run => Disposition::WouldCancel,
                None => Disposition::Cancelled,
            };

            actions.push(EnforcementAction {
                user: status.user().to_string(),
                job_id: job.job_id,
                job_name: job.name.clone(),
                disposition,
                outcome: None,
            });
        }
    }

    actions
}

/// Decide dispositions and cancel the jobs that have no exemption.
///
/// Runs to completion for the given snapshot; a failed cancellation is
/// recorded on its action and the pass moves on to the next job.
pub async fn check_enforcement<K: JobCanceller>(
    statuses: &[UserStatus],
    config: &EnforcementConfig,
    canceller: &K,
) -> Vec<EnforcementAction> {
    let mut actions = plan_enforcement(statuses, config);

    for action in actions
        .iter_mut()
        .filter(|a| a.disposition == Disposition::Cancelled)
    {
        let outcome = canceller.cancel(action.job_id).await;
        match &outcome {
            CancelOutcome::Cancelled => {
                tracing::info!(user = %action.user, job_id = action.job_id, "cancelled job");
            }
            CancelOutcome::AlreadyGone => {
                tracing::info!(
                    user = %action.user,
                    job_id = action.job_id,
                    "job already gone before cancellation"
                );
            }
            CancelOutcome::Failed(reason) => {
                tracing::warn!(
                    user = %action.user,
                    job_id = action.job_id,
                    "failed to cancel job: {}",
                    reason
                );
            }
        }
        action.outcome = Some(outcome);
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobState, UsageReport};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn job(id: u64, name: &str, hours_ago: i64) -> JobRecord {
        JobRecord {
            job_id: id,
            name: name.to_string(),
            user: "alice".to_string(),
            qos: "normal".to_string(),
            n_gpus: 1,
            elapsed_seconds: 3600,
            start_time: now() - TimeDelta::hours(hours_ago),
            state: JobState::Running,
            ..JobRecord::default()
        }
    }

    fn status(user: &str, used: f64, jobs: Vec<JobRecord>, in_grace: bool) -> UserStatus {
        let mut report = UsageReport::new(user, "normal", used, 10, 30);
        report.active_jobs = jobs;
        UserStatus {
            report,
            in_grace_period: in_grace,
            exceeded_at: Some(now() - TimeDelta::hours(12)),
        }
    }

    fn live() -> EnforcementConfig {
        EnforcementConfig {
            enabled: true,
            dry_run: false,
            ..EnforcementConfig::default()
        }
    }

    fn dispositions(actions: &[EnforcementAction]) -> Vec<(u64, Disposition)> {
        actions.iter().map(|a| (a.job_id, a.disposition)).collect()
    }

    /// Records cancellation requests and answers from a script.
    #[derive(Default)]
    struct FakeCanceller {
        requested: Mutex<Vec<u64>>,
        outcomes: HashMap<u64, CancelOutcome>,
    }

    impl JobCanceller for FakeCanceller {
        async fn cancel(&self, job_id: u64) -> CancelOutcome {
            self.requested.lock().unwrap().push(job_id);
            self.outcomes
                .get(&job_id)
                .cloned()
                .unwrap_or(CancelOutcome::Cancelled)
        }
    }

    #[test]
    fn test_non_exceeded_users_are_ignored() {
        let statuses = vec![status("alice", 9.0, vec![job(1, "train", 1)], false)];
        assert!(plan_enforcement(&statuses, &live()).is_empty());
    }

    #[test]
    fn test_grace_period_applies_to_every_job() {
        let statuses = vec![status(
            "alice",
            15.0,
            vec![job(1, "train", 2), job(2, "debug_x", 1)],
            true,
        )];
        let actions = plan_enforcement(&statuses, &live());
        assert_eq!(
            dispositions(&actions),
            vec![(2, Disposition::GracePeriod), (1, Disposition::GracePeriod)]
        );
    }

    #[test]
    fn test_exempt_user_wins_over_everything_but_grace() {
        let config = EnforcementConfig {
            exempt_users: vec!["alice".to_string()],
            exempt_job_prefixes: vec!["debug_".to_string()],
            ..live()
        };
        let statuses = vec![status(
            "alice",
            15.0,
            vec![job(1, "train", 2), job(2, "debug_x", 1)],
            false,
        )];
        for dry_run in [true, false] {
            let config = EnforcementConfig {
                dry_run,
                ..config.clone()
            };
            let actions = plan_enforcement(&statuses, &config);
            assert!(
                actions
                    .iter()
                    .all(|a| a.disposition == Disposition::ExemptUser)
            );
            assert_eq!(actions.len(), 2);
        }
    }

    #[test]
    fn test_prefix_exemption_checked_before_dry_run() {
        let config = EnforcementConfig {
            dry_run: true,
            exempt_job_prefixes: vec!["debug_".to_string(), "test_".to_string()],
            ..live()
        };
        let statuses = vec![status(
            "alice",
            15.0,
            vec![job(1, "train", 3), job(2, "debug_x", 2), job(3, "test_y", 1)],
            false,
        )];
        let actions = plan_enforcement(&statuses, &config);
        assert_eq!(
            dispositions(&actions),
            vec![
                (3, Disposition::ExemptPrefix),
                (2, Disposition::ExemptPrefix),
                (1, Disposition::WouldCancel),
            ]
        );
    }

    #[test]
    fn test_cancel_order() {
        let jobs = vec![job(1, "a", 5), job(2, "b", 1), job(3, "c", 3)];
        let lifo: Vec<u64> = ordered_jobs(&jobs, CancelOrder::Lifo)
            .iter()
            .map(|j| j.job_id)
            .collect();
        let fifo: Vec<u64> = ordered_jobs(&jobs, CancelOrder::Fifo)
            .iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(lifo, vec![2, 3, 1]);
        assert_eq!(fifo, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_dry_run_never_cancels() {
        let canceller = FakeCanceller::default();
        let config = EnforcementConfig {
            dry_run: true,
            ..live()
        };
        let statuses = vec![status("alice", 15.0, vec![job(1, "train", 1)], false)];

        let actions = check_enforcement(&statuses, &config, &canceller).await;
        assert_eq!(dispositions(&actions), vec![(1, Disposition::WouldCancel)]);
        assert!(canceller.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grace_period_never_cancels() {
        let canceller = FakeCanceller::default();
        let statuses = vec![status("alice", 15.0, vec![job(1, "train", 1)], true)];

        let actions = check_enforcement(&statuses, &live(), &canceller).await;
        assert_eq!(dispositions(&actions), vec![(1, Disposition::GracePeriod)]);
        assert!(canceller.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_cancels_and_tolerates_races_and_failures() {
        let canceller = FakeCanceller {
            outcomes: HashMap::from([
                (2, CancelOutcome::AlreadyGone),
                (3, CancelOutcome::Failed("permission denied".to_string())),
            ]),
            ..FakeCanceller::default()
        };
        let statuses = vec![
            status(
                "alice",
                15.0,
                vec![job(1, "train", 3), job(2, "eval", 2), job(3, "sweep", 1)],
                false,
            ),
            status("bob", 12.0, vec![job(4, "train", 1)], true),
        ];

        let actions = check_enforcement(&statuses, &live(), &canceller).await;

        assert_eq!(*canceller.requested.lock().unwrap(), vec![3, 2, 1]);
        let alice: Vec<&EnforcementAction> =
            actions.iter().filter(|a| a.user == "alice").collect();
        assert!(
            alice
                .iter()
                .all(|a| a.disposition == Disposition::Cancelled)
        );

        let by_id: HashMap<u64, &EnforcementAction> =
            actions.iter().map(|a| (a.job_id, a)).collect();
        assert!(by_id[&1].did_cancel());
        assert!(by_id[&2].did_cancel());
        assert!(!by_id[&3].did_cancel());
        assert_eq!(by_id[&4].disposition, Disposition::GracePeriod);
        assert_eq!(by_id[&4].outcome, None);
    }
}

//! Periodic quota checks with optional enforcement.

use slurmq_config::{ClusterConfig, SlurmqConfig};
use slurmq_core::{
    EnforcementAction, JobCanceller, JobRecord, QuotaChecker, QuotaError, UserStatus,
    check_enforcement, get_all_user_statuses,
};
use slurmq_slurm::{SacctError, SacctQuery, query_sacct};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Sacct(#[from] SacctError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// Result of one monitoring pass.
#[derive(Debug)]
pub struct Cycle {
    pub statuses: Vec<UserStatus>,
    /// `None` when enforcement is off for this run
    pub actions: Option<Vec<EnforcementAction>>,
}

pub struct Monitor<'a> {
    config: &'a SlurmqConfig,
    cluster: &'a ClusterConfig,
    enforce: bool,
}

impl<'a> Monitor<'a> {
    pub fn new(config: &'a SlurmqConfig, cluster: &'a ClusterConfig, enforce: bool) -> Self {
        Self {
            config,
            cluster,
            enforce,
        }
    }

    pub fn cluster(&self) -> &ClusterConfig {
        self.cluster
    }

    /// Enforcement needs both the command-line flag and `enforcement.enabled`.
    pub fn enforcing(&self) -> bool {
        self.enforce && self.config.enforcement.enabled
    }

    fn checker(&self) -> QuotaChecker {
        QuotaChecker::new(self.cluster.clone()).with_thresholds(
            self.config.monitoring.warning_threshold,
            self.config.monitoring.critical_threshold,
        )
    }

    /// Evaluate a snapshot and, when enforcing, act on it.
    pub async fn evaluate<K: JobCanceller>(
        &self,
        records: &[JobRecord],
        canceller: &K,
    ) -> Result<Cycle, QuotaError> {
        self.evaluate_with(&self.checker(), records, canceller).await
    }

    async fn evaluate_with<K: JobCanceller>(
        &self,
        checker: &QuotaChecker,
        records: &[JobRecord],
        canceller: &K,
    ) -> Result<Cycle, QuotaError> {
        let grace_hours = self.config.enforcement.grace_period_hours;
        let statuses = get_all_user_statuses(records, checker, grace_hours)?;

        let actions = if self.enforcing() {
            Some(check_enforcement(&statuses, &self.config.enforcement, canceller).await)
        } else {
            None
        };

        Ok(Cycle { statuses, actions })
    }

    /// Fetch all users' jobs for the cluster window and evaluate them.
    ///
    /// The query starts at the same cutoff the evaluation filters by.
    pub async fn cycle<K: JobCanceller>(&self, canceller: &K) -> Result<Cycle, MonitorError> {
        let checker = self.checker();
        let query = SacctQuery::for_cluster(self.cluster).since(checker.window_cutoff(None));
        let records = query_sacct(&query).await?;
        tracing::debug!(cluster = %self.cluster.name, records = records.len(), "monitor cycle");
        Ok(self.evaluate_with(&checker, &records, canceller).await?)
    }

    /// Run cycles every `every` until Ctrl-C. A cycle in progress always
    /// finishes before the loop stops; failed cycles are reported and the
    /// loop carries on.
    pub async fn run<K, F>(&self, canceller: &K, every: Duration, mut on_cycle: F)
    where
        K: JobCanceller,
        F: FnMut(Result<Cycle, MonitorError>),
    {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    on_cycle(self.cycle(canceller).await);
                }
                _ = &mut shutdown => {
                    tracing::debug!("received Ctrl-C, stopping monitor");
                    break;
                }
            }
        }
    }
}

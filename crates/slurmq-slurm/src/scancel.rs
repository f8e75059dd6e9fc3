//! Cancel jobs via scancel.

use crate::command::{Completion, run_completion};
use slurmq_core::{CancelOutcome, JobCanceller};
use tokio::process::Command;

/// stderr fragments scancel prints when the job is no longer there.
const GONE_MARKERS: [&str; 4] = [
    "already completing",
    "already completed",
    "invalid job id",
    "job has finished",
];

/// scancel arguments; `-Q` suppresses errors for jobs that already ended.
pub fn scancel_args(job_id: u64, quiet: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(2);
    if quiet {
        args.push("-Q".to_string());
    }
    args.push(job_id.to_string());
    args
}

impl From<Completion> for CancelOutcome {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Succeeded => Self::Cancelled,
            Completion::TargetGone => Self::AlreadyGone,
            Completion::Failed(reason) => Self::Failed(format!("scancel: {reason}")),
        }
    }
}

/// Cancel one job. Never returns an error; failures come back as
/// [`CancelOutcome::Failed`].
pub async fn cancel_job(job_id: u64, quiet: bool) -> CancelOutcome {
    let mut cmd = Command::new("scancel");
    cmd.args(scancel_args(job_id, quiet));

    match run_completion(&mut cmd, "scancel", &GONE_MARKERS).await {
        Ok(completion) => completion.into(),
        Err(e) => CancelOutcome::Failed(e.to_string()),
    }
}

/// [`JobCanceller`] backed by the scancel command.
#[derive(Debug, Clone, Copy)]
pub struct Scancel {
    quiet: bool,
}

impl Scancel {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Default for Scancel {
    fn default() -> Self {
        Self::new(true)
    }
}

impl JobCanceller for Scancel {
    async fn cancel(&self, job_id: u64) -> CancelOutcome {
        cancel_job(job_id, self.quiet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(stderr: &str) -> CancelOutcome {
        Completion::classify(false, stderr, &GONE_MARKERS).into()
    }

    #[test]
    fn test_scancel_args() {
        assert_eq!(scancel_args(42, true), vec!["-Q", "42"]);
        assert_eq!(scancel_args(42, false), vec!["42"]);
    }

    #[test]
    fn test_outcome_from_stderr() {
        assert_eq!(
            CancelOutcome::from(Completion::Succeeded),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            outcome("scancel: error: Kill job error on job id 42: Job/step already completing"),
            CancelOutcome::AlreadyGone
        );
        assert_eq!(
            outcome("scancel: error: Invalid job id 42"),
            CancelOutcome::AlreadyGone
        );
        assert_eq!(
            outcome("Access/permission denied\n"),
            CancelOutcome::Failed("scancel: Access/permission denied".to_string())
        );
        assert!(matches!(outcome("  "), CancelOutcome::Failed(_)));
    }
}

//! GPU-hour quota accounting and enforcement for Slurm.
//!
//! Takes an already-fetched set of job records and computes rolling-window
//! usage per user, classifies it against thresholds, forecasts availability,
//! and decides which running jobs to cancel. Also summarises cluster-wide
//! utilization and per-job efficiency.

pub mod clock;
pub mod efficiency;
pub mod enforcement;
pub mod exceeded;
pub mod memory;
pub mod models;
pub mod quota;
pub mod stats;
pub mod status;

pub use clock::{Clock, FixedClock, SystemClock};
pub use efficiency::{JobEfficiency, LOW_EFFICIENCY_PCT, Recommendation};
pub use enforcement::{
    CancelOutcome, Disposition, EnforcementAction, JobCanceller, check_enforcement,
    plan_enforcement,
};
pub use exceeded::{find_exceeded_timestamp, in_grace_period};
pub use memory::{MemoryScope, format_memory_mb, parse_memory_mb, requested_memory_mb};
pub use models::{JobRecord, JobState, QuotaStatus, UsageReport};
pub use quota::{
    DEFAULT_FORECAST_HOURS, QuotaChecker, QuotaError, QuotaForecast, calculate_gpu_hours,
    filter_by_cutoff, filter_by_user,
};
pub use stats::{
    DEFAULT_SMALL_THRESHOLD, GroupKey, GroupReport, GroupStats, JobSample, LONG_WAIT_HOURS,
    SizeBreakdown, StatsError, format_time_human, pct_change, samples, stats_groups,
};
pub use status::{UserStatus, UserUsage, aggregate_by_user, get_all_user_statuses};

//! When did a user cross their quota?

use crate::models::JobRecord;
use chrono::{DateTime, Utc};

/// Start time of the job whose inclusion first pushed cumulative usage
/// strictly above `quota_limit`, walking jobs in start-time order.
///
/// Returns `None` for an empty set or if usage never exceeds the limit.
/// Independent of the current time.
pub fn find_exceeded_timestamp<'r, I>(records: I, quota_limit: f64) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = &'r JobRecord>,
{
    let mut sorted: Vec<&JobRecord> = records.into_iter().collect();
    sorted.sort_by_key(|r| r.start_time);

    let mut cumulative = 0.0;
    for record in sorted {
        cumulative += record.gpu_hours();
        if cumulative > quota_limit {
            return Some(record.start_time);
        }
    }

    None
}

/// Whether fewer than `grace_period_hours` have passed since `exceeded_at`.
pub fn in_grace_period(
    exceeded_at: DateTime<Utc>,
    now: DateTime<Utc>,
    grace_period_hours: u32,
) -> bool {
    let elapsed_ms = now.signed_duration_since(exceeded_at).num_milliseconds();
    let hours_since = elapsed_ms as f64 / 3_600_000.0;
    hours_since < f64::from(grace_period_hours)
}

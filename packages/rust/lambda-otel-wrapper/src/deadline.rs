//! Remaining-time arithmetic for an invocation.

use lambda_runtime::Context;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time left before the platform deadline carried by `ctx`.
///
/// Returns zero when the host supplied no deadline or it already passed.
pub fn remaining_time(ctx: &Context) -> Duration {
    remaining_time_at(ctx.deadline, now_millis())
}

pub(crate) fn remaining_time_at(deadline_ms: u64, now_ms: u64) -> Duration {
    if deadline_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(deadline_ms.saturating_sub(now_ms))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Human readable form of the remaining time, rounded up to whole seconds.
///
/// `"1m40s"` when there is at least a minute, otherwise `"40s"`.
pub fn format_timeout(remaining: Duration) -> String {
    let seconds = remaining.as_millis().div_ceil(1000);
    let minutes = seconds / 60;
    let seconds = seconds % 60;
    if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

//! Read-only time projections for consoles.
//!
//! Everything here is derived from `created_at` and the caller's clock and is
//! never written back to the store.

use chrono::{DateTime, Duration, Utc};

/// Time left before a pending alert becomes eligible for escalation, clamped at zero.
pub fn remaining(created_at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> Duration {
    let left = grace - (now - created_at);
    if left < Duration::zero() {
        Duration::zero()
    } else {
        left
    }
}

/// `"1m 42s left"`, or `"0s left"` once the grace period has run out.
pub fn remaining_label(created_at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> String {
    let secs = remaining(created_at, now, grace).num_seconds();
    let (mins, secs) = (secs / 60, secs % 60);
    if mins > 0 {
        format!("{mins}m {secs}s left")
    } else {
        format!("{secs}s left")
    }
}

/// Elapsed time as `MM:SS`.
pub fn elapsed_label(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - created_at).num_seconds().max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn time_ago(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let mins = (now - created_at).num_minutes();
    if mins < 1 {
        "Just now".to_string()
    } else {
        format!("{mins}m ago")
    }
}

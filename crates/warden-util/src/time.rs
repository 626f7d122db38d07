//! Time helpers for vmwarden
//!
//! Expiration deadlines are absolute UTC instants persisted with the VM row;
//! everything user-facing derives from the remaining seconds against `now()`.

use chrono::{DateTime, Utc};

/// Get the current UTC time.
///
/// Single call-site wrapper so operations can take an explicit `now` and tests
/// can pin deadlines without touching the clock.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds until `deadline`, clamped to zero once it has passed.
pub fn remaining_seconds(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    deadline.signed_duration_since(now).num_seconds().max(0) as u64
}

/// Format a remaining-seconds count as `"{h}h {m}m"` for display.
pub fn format_remaining(seconds: u64) -> String {
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn remaining_counts_down() {
        let now = now();
        let deadline = now + Duration::hours(4);
        assert_eq!(remaining_seconds(deadline, now), 4 * 3600);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let now = now();
        let past = now - Duration::minutes(5);
        assert_eq!(remaining_seconds(past, now), 0);
    }

    #[test]
    fn format_hours_and_minutes() {
        assert_eq!(format_remaining(4 * 3600), "4h 0m");
        assert_eq!(format_remaining(3 * 3600 + 59 * 60 + 59), "3h 59m");
        assert_eq!(format_remaining(0), "0h 0m");
    }
}

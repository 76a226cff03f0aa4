//! Time remaining until an unpaid order expires.
//!
//! The countdown is cosmetic; the backend enforces expiry on its own.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Payment window assumed when the order carries no expiry time.
pub const DEFAULT_PAYMENT_WINDOW: Duration = Duration::hours(24);

/// Remaining time on an order's payment window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    remaining_secs: i64,
}

impl Countdown {
    /// Countdown from `now` to `expires_at`, or a full default window when
    /// there is no expiry.
    #[must_use]
    pub fn until(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let end = expires_at.unwrap_or(now + DEFAULT_PAYMENT_WINDOW);
        Self {
            remaining_secs: (end - now).num_seconds().max(0),
        }
    }

    /// Seconds left, never negative.
    #[must_use]
    pub const fn remaining_secs(&self) -> i64 {
        self.remaining_secs
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }
}

impl std::fmt::Display for Countdown {
    /// `HH:MM:SS`; hours are not wrapped at 24.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.remaining_secs;
        write!(f, "{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    #[test]
    fn test_formats_remaining_time() {
        let c = Countdown::until(Some(now() + Duration::seconds(3725)), now());
        assert_eq!(c.to_string(), "01:02:05");
        assert!(!c.is_expired());
    }

    #[test]
    fn test_default_window_without_expiry() {
        let c = Countdown::until(None, now());
        assert_eq!(c.to_string(), "24:00:00");
        assert_eq!(c.remaining_secs(), 86_400);
    }

    #[test]
    fn test_past_expiry_clamps_to_zero() {
        let c = Countdown::until(Some(now() - Duration::minutes(5)), now());
        assert_eq!(c.to_string(), "00:00:00");
        assert!(c.is_expired());
    }

    #[test]
    fn test_hours_do_not_wrap() {
        let c = Countdown::until(Some(now() + Duration::hours(49)), now());
        assert_eq!(c.to_string(), "49:00:00");
    }
}

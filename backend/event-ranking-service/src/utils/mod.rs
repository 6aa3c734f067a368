// Utility functions for event-ranking-service

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Floor for time urgency: anything starting within the hour counts as "now"
pub const MIN_DAYS_UNTIL: f64 = 1.0 / 24.0;

/// Fractional days from `now` until `start`, never negative
pub fn days_until(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (start - now).num_milliseconds() as f64 / 1000.0;
    (seconds / SECONDS_PER_DAY).max(0.0)
}

/// Descending comparison that treats NaN as equal
pub fn cmp_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_days_until_is_fractional() {
        let now = Utc::now();
        let d = days_until(now + Duration::hours(36), now);
        assert!((d - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_days_until_clamps_past_to_zero() {
        let now = Utc::now();
        assert_eq!(days_until(now - Duration::hours(3), now), 0.0);
    }

    #[test]
    fn test_cmp_desc() {
        let mut scores = vec![0.2, 0.9, 0.5];
        scores.sort_by(|a, b| cmp_desc(*a, *b));
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
        assert_eq!(cmp_desc(f64::NAN, 1.0), Ordering::Equal);
    }
}

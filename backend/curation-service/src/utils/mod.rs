// Utility functions for curation-service

use chrono::{DateTime, Duration, Utc};

/// Items older than this sit at the top of the recency scale
pub const RECENCY_HORIZON_DAYS: i64 = 7;

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f64, min: f64, max: f64) -> f64 {
    if max - min < f64::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Age on the recency scale: 0 = published now, 1 = a week or older.
/// Future timestamps count as brand new.
pub fn normalized_age(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now - published_at;
    if age <= Duration::zero() {
        return 0.0;
    }
    let horizon = Duration::days(RECENCY_HORIZON_DAYS).num_milliseconds() as f64;
    normalize_score(age.num_milliseconds() as f64, 0.0, horizon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 0.001);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 0.001);
        assert!((normalize_score(0.0, 0.0, 10.0) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_normalized_age() {
        let now = Utc::now();
        // 半週應該約為 0.5
        let half = normalized_age(now - Duration::hours(84), now);
        assert!((half - 0.5).abs() < 1e-9);

        // 超過一週封頂為 1.0
        assert_eq!(normalized_age(now - Duration::days(30), now), 1.0);
        assert_eq!(normalized_age(now + Duration::hours(1), now), 0.0);
    }
}

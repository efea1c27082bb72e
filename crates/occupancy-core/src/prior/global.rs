use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use super::{GlobalPrior, MAX_PROBABILITY, MIN_PROBABILITY};
use crate::intervals::{clip_to_period, total_occupied_seconds, TimeInterval};

/// Stable digest of the inputs behind a global prior.
pub fn create_data_hash(
    area_name: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    total_occupied_seconds: f64,
    interval_count: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(area_name.as_bytes());
    hasher.update(period_start.to_rfc3339().as_bytes());
    hasher.update(period_end.to_rfc3339().as_bytes());
    hasher.update(format!("{total_occupied_seconds:.3}").as_bytes());
    hasher.update(interval_count.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Occupied fraction of the observed period, clamped to `[0.01, 0.99]`.
///
/// The period runs from the earliest start to the latest end. When the latest
/// end lies within an hour of `now` (or after it) the period is capped at `now`.
/// No valid data, or a non-positive period, yields `MIN_PROBABILITY`.
pub fn calculate_global_prior(
    area_name: &str,
    intervals: &[TimeInterval],
    now: DateTime<Utc>,
) -> GlobalPrior {
    let valid: Vec<TimeInterval> = intervals.iter().copied().filter(|i| i.is_valid()).collect();

    let fallback = |period_start: DateTime<Utc>, period_end: DateTime<Utc>| GlobalPrior {
        value: MIN_PROBABILITY,
        period_start,
        period_end,
        total_occupied_seconds: 0.0,
        total_period_seconds: 0.0,
        interval_count: valid.len(),
        data_hash: create_data_hash(area_name, period_start, period_end, 0.0, valid.len()),
        calculation_date: now,
    };

    let (Some(first_start), Some(last_end)) = (
        valid.iter().map(|i| i.start).min(),
        valid.iter().map(|i| i.end).max(),
    ) else {
        return fallback(now, now);
    };

    let mut period_end = if last_end < first_start { now } else { last_end };
    if now - last_end < Duration::hours(1) {
        period_end = now;
    }

    let period_secs = (period_end - first_start).num_milliseconds() as f64 / 1000.0;
    if period_secs <= 0.0 {
        return fallback(first_start, period_end);
    }

    let occupied_secs = total_occupied_seconds(&clip_to_period(&valid, first_start, period_end));
    let value = (occupied_secs / period_secs).clamp(MIN_PROBABILITY, MAX_PROBABILITY);

    GlobalPrior {
        value,
        period_start: first_start,
        period_end,
        total_occupied_seconds: occupied_secs,
        total_period_seconds: period_secs,
        interval_count: valid.len(),
        data_hash: create_data_hash(area_name, first_start, period_end, occupied_secs, valid.len()),
        calculation_date: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn test_fully_occupied_period_clamps_to_max() {
        let prior = calculate_global_prior("living", &[TimeInterval::new(t(0), t(2))], t(100));
        assert_eq!(prior.value, MAX_PROBABILITY);
        assert_eq!(prior.total_period_seconds, 7200.0);
    }

    #[test]
    fn test_near_zero_occupancy_clamps_to_min() {
        let intervals = vec![
            TimeInterval::new(t(0), t(0) + Duration::seconds(1)),
            TimeInterval::new(t(999), t(1000)),
        ];
        let prior = calculate_global_prior("living", &intervals, t(5000));
        assert_eq!(prior.value, MIN_PROBABILITY);
    }

    #[test]
    fn test_no_intervals_falls_back_to_min() {
        let prior = calculate_global_prior("living", &[], t(10));
        assert_eq!(prior.value, MIN_PROBABILITY);
        assert_eq!(prior.interval_count, 0);
    }

    #[test]
    fn test_inverted_intervals_are_filtered() {
        let prior = calculate_global_prior("living", &[TimeInterval::new(t(5), t(1))], t(10));
        assert_eq!(prior.value, MIN_PROBABILITY);
        assert_eq!(prior.interval_count, 0);
    }

    #[test]
    fn test_fraction_of_period() {
        let intervals = vec![
            TimeInterval::new(t(0), t(1)),
            TimeInterval::new(t(3), t(4)),
        ];
        let prior = calculate_global_prior("living", &intervals, t(100));
        assert!((prior.value - 0.5).abs() < 1e-9);
        assert_eq!(prior.period_end, t(4));
    }

    #[test]
    fn test_recent_interval_caps_period_at_now() {
        let now = t(4) + Duration::minutes(30);
        let intervals = vec![
            TimeInterval::new(t(0), t(1)),
            TimeInterval::new(t(3), t(4)),
        ];
        let prior = calculate_global_prior("living", &intervals, now);
        assert_eq!(prior.period_end, now);
        assert!((prior.value - 2.0 / 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_period_falls_back() {
        let prior = calculate_global_prior("living", &[TimeInterval::new(t(2), t(2))], t(50));
        assert_eq!(prior.value, MIN_PROBABILITY);
    }

    #[test]
    fn test_data_hash_is_deterministic() {
        let a = create_data_hash("living", t(0), t(24), 100.0, 10);
        let b = create_data_hash("living", t(0), t(24), 100.0, 10);
        let c = create_data_hash("living", t(0), t(48), 200.0, 20);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

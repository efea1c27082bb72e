//! Duration-weighted likelihoods for binary sensors.

use chrono::{DateTime, Utc};

use super::{AnalysisError, BinaryLikelihoodResult, LearnedBinaryLikelihood, MAX_BINARY_LIKELIHOOD, MIN_BINARY_LIKELIHOOD};
use crate::intervals::{clip_to_period, merge_overlapping_intervals, TimeInterval};
use crate::sensor::SensorStateInterval;

/// Map raw `on`/`off` to `open`/`closed` when the active states speak door/window.
pub fn map_binary_state_to_semantic(state: &str, active_states: &[String]) -> String {
    let uses_open_closed = active_states.iter().any(|s| s == "open" || s == "closed");
    if uses_open_closed {
        match state {
            "on" => return "open".to_string(),
            "off" => return "closed".to_string(),
            _ => {}
        }
    }
    state.to_string()
}

fn overlap_secs(a: &[TimeInterval], b: &[TimeInterval]) -> f64 {
    // Both inputs are merged, so pairwise overlaps never double count.
    a.iter()
        .map(|x| b.iter().map(|y| x.overlap_secs(y)).sum::<f64>())
        .sum()
}

/// `P(active | occupied)` and `P(active | unoccupied)` by time spent in each.
///
/// Returns `None` when `active_states` is empty.
pub fn analyze_binary_likelihoods(
    entity_id: &str,
    state_intervals: &[SensorStateInterval],
    occupied_intervals: &[TimeInterval],
    period: (DateTime<Utc>, DateTime<Utc>),
    active_states: &[String],
) -> Option<BinaryLikelihoodResult> {
    if active_states.is_empty() {
        return None;
    }
    let (period_start, period_end) = period;
    let result = |likelihood| BinaryLikelihoodResult {
        entity_id: entity_id.to_string(),
        likelihood,
        analysis_period_start: period_start,
        analysis_period_end: period_end,
    };

    let occupied = merge_overlapping_intervals(&clip_to_period(occupied_intervals, period_start, period_end));
    if occupied.is_empty() {
        return Some(result(LearnedBinaryLikelihood::failed(AnalysisError::NoOccupiedIntervals)));
    }

    let in_period: Vec<&SensorStateInterval> = state_intervals
        .iter()
        .filter(|s| s.interval().clip(period_start, period_end).is_some())
        .collect();
    if in_period.is_empty() {
        return Some(result(LearnedBinaryLikelihood::failed(AnalysisError::NoSensorData)));
    }

    let active_raw: Vec<TimeInterval> = in_period
        .iter()
        .filter(|s| {
            let state = map_binary_state_to_semantic(&s.state, active_states);
            active_states.iter().any(|a| *a == state)
        })
        .map(|s| s.interval())
        .collect();
    let active = merge_overlapping_intervals(&clip_to_period(&active_raw, period_start, period_end));
    if active.is_empty() {
        return Some(result(LearnedBinaryLikelihood::failed(AnalysisError::NoActiveIntervals)));
    }

    let active_occupied = overlap_secs(&active, &occupied);
    if active_occupied <= 0.0 {
        return Some(result(LearnedBinaryLikelihood::failed(AnalysisError::NoActiveDuringOccupied)));
    }

    let occupied_secs: f64 = occupied.iter().map(TimeInterval::duration_secs).sum();
    let active_secs: f64 = active.iter().map(TimeInterval::duration_secs).sum();
    let period_secs = (period_end - period_start).num_milliseconds() as f64 / 1000.0;
    let unoccupied_secs = period_secs - occupied_secs;

    let prob_given_true = (active_occupied / occupied_secs).clamp(MIN_BINARY_LIKELIHOOD, MAX_BINARY_LIKELIHOOD);
    let prob_given_false = if unoccupied_secs <= 0.0 {
        MIN_BINARY_LIKELIHOOD
    } else {
        ((active_secs - active_occupied) / unoccupied_secs).clamp(MIN_BINARY_LIKELIHOOD, MAX_BINARY_LIKELIHOOD)
    };

    Some(result(LearnedBinaryLikelihood {
        prob_given_true: Some(prob_given_true),
        prob_given_false: Some(prob_given_false),
        analysis_error: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 7, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn state(start: i64, end: i64, state: &str) -> SensorStateInterval {
        SensorStateInterval {
            entity_id: "media_player.tv".into(),
            start: t(start),
            end: t(end),
            state: state.into(),
        }
    }

    fn playing() -> Vec<String> {
        vec!["playing".to_string()]
    }

    fn run(states: &[SensorStateInterval], occupied: &[TimeInterval]) -> BinaryLikelihoodResult {
        analyze_binary_likelihoods("media_player.tv", states, occupied, (t(0), t(10)), &playing()).unwrap()
    }

    #[test]
    fn test_duration_weighted_likelihoods() {
        // Occupied 0-4; playing 1-3 (occupied) and 6-7 (unoccupied).
        let states = vec![
            state(0, 1, "idle"),
            state(1, 3, "playing"),
            state(3, 6, "idle"),
            state(6, 7, "playing"),
            state(7, 10, "off"),
        ];
        let result = run(&states, &[TimeInterval::new(t(0), t(4))]);
        let (p_true, p_false) = result.likelihood.pair().unwrap();
        assert!((p_true - 0.5).abs() < 1e-9);
        assert!((p_false - 1.0 / 6.0).abs() < 1e-9);
        assert_eq!(result.analysis_period_start, t(0));
    }

    #[test]
    fn test_probabilities_are_clamped() {
        let states = vec![state(0, 4, "playing"), state(4, 10, "idle")];
        let result = run(&states, &[TimeInterval::new(t(0), t(4))]);
        assert_eq!(result.likelihood.pair(), Some((MAX_BINARY_LIKELIHOOD, MIN_BINARY_LIKELIHOOD)));
    }

    #[test]
    fn test_fully_occupied_period_gives_min_false() {
        let states = vec![state(0, 5, "playing")];
        let result = run(&states, &[TimeInterval::new(t(0), t(10))]);
        assert_eq!(result.likelihood.prob_given_false, Some(MIN_BINARY_LIKELIHOOD));
    }

    #[test]
    fn test_error_order() {
        let states = vec![state(0, 10, "idle")];
        assert_eq!(
            run(&states, &[]).likelihood.analysis_error,
            Some(AnalysisError::NoOccupiedIntervals)
        );
        assert_eq!(
            run(&[state(20, 30, "playing")], &[TimeInterval::new(t(0), t(4))]).likelihood.analysis_error,
            Some(AnalysisError::NoSensorData)
        );
        assert_eq!(
            run(&states, &[TimeInterval::new(t(0), t(4))]).likelihood.analysis_error,
            Some(AnalysisError::NoActiveIntervals)
        );
        assert_eq!(
            run(&[state(6, 8, "playing")], &[TimeInterval::new(t(0), t(4))]).likelihood.analysis_error,
            Some(AnalysisError::NoActiveDuringOccupied)
        );
    }

    #[test]
    fn test_failed_result_has_no_probabilities() {
        let result = run(&[], &[]);
        assert!(result.likelihood.prob_given_true.is_none());
        assert!(result.likelihood.pair().is_none());
    }

    #[test]
    fn test_empty_active_states_returns_none() {
        let states = vec![state(0, 4, "playing")];
        assert!(analyze_binary_likelihoods("tv", &states, &[TimeInterval::new(t(0), t(4))], (t(0), t(10)), &[]).is_none());
    }

    #[test]
    fn test_semantic_mapping() {
        let door = vec!["closed".to_string()];
        assert_eq!(map_binary_state_to_semantic("on", &door), "open");
        assert_eq!(map_binary_state_to_semantic("off", &door), "closed");
        assert_eq!(map_binary_state_to_semantic("on", &playing()), "on");
        assert_eq!(map_binary_state_to_semantic("playing", &door), "playing");
    }

    #[test]
    fn test_door_on_off_states_counted_as_active() {
        let door = vec!["open".to_string()];
        let states = vec![SensorStateInterval {
            entity_id: "binary_sensor.door".into(),
            start: t(0),
            end: t(2),
            state: "on".into(),
        }];
        let result = analyze_binary_likelihoods("binary_sensor.door", &states, &[TimeInterval::new(t(0), t(4))], (t(0), t(10)), &door)
            .unwrap();
        assert!(result.likelihood.analysis_error.is_none());
        assert!((result.likelihood.prob_given_true.unwrap() - 0.5).abs() < 1e-9);
    }
}

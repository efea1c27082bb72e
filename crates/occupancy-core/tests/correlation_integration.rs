//! Integration tests for correlation and likelihood learning.

use chrono::{DateTime, Duration, TimeZone, Utc};
use occupancy_core::correlation::{
    analyze_and_save_correlation, analyze_binary_likelihoods, get_correlation_for_entity,
    save_binary_likelihood_result, SensorHistory,
};
use occupancy_core::occupied::MOTION_CACHE_SOURCE;
use occupancy_core::{
    AnalysisError, CorrelationType, Database, Entity, InputType, Repository, SensorSample, SensorStateInterval,
    TimeInterval,
};

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 0, 0, 0).unwrap()
}

/// Occupied every evening 18:00-22:00 for a week.
fn evening_intervals(days: i64) -> Vec<TimeInterval> {
    (0..days)
        .map(|d| {
            let day = day_start() + Duration::days(d);
            TimeInterval::new(day + Duration::hours(18), day + Duration::hours(22))
        })
        .collect()
}

fn seed_co2(db: &Database, occupied: &[TimeInterval], days: i64) {
    for i in 0..(days * 48) {
        let ts = day_start() + Duration::minutes(30 * i);
        let is_occupied = occupied.iter().any(|o| o.contains(ts));
        let base = if is_occupied { 800.0 } else { 420.0 };
        db.insert_numeric_sample(
            "living",
            &SensorSample {
                entity_id: "sensor.co2".into(),
                timestamp: ts,
                value: base + (i % 7) as f64 * 3.0,
                unit: Some("ppm".into()),
            },
        )
        .unwrap();
    }
}

#[test]
fn test_numeric_correlation_workflow() {
    let db = Database::open_memory().unwrap();
    let occupied = evening_intervals(7);
    db.save_occupied_intervals_cache("living", &occupied, MOTION_CACHE_SOURCE).unwrap();
    seed_co2(&db, &occupied, 7);

    let period = (day_start(), day_start() + Duration::days(7));
    let now = period.1;

    let result = analyze_and_save_correlation(
        &db,
        "living",
        "sensor.co2",
        InputType::Co2,
        period,
        now,
        SensorHistory::Numeric,
        &Utc,
    )
    .unwrap()
    .expect("result should be saved");

    assert!(result.analysis_error.is_none());
    assert_eq!(result.correlation_type, CorrelationType::StrongPositive);
    assert!(result.coefficient > 0.9);
    assert_eq!(result.sample_count, 7 * 48);
    assert!(result.mean_value_when_occupied.unwrap() > result.mean_value_when_unoccupied.unwrap());

    let stored = get_correlation_for_entity(&db, "living", "sensor.co2", now, &Utc)
        .unwrap()
        .unwrap();
    assert_eq!(stored.correlation_type, CorrelationType::StrongPositive);
    assert!((stored.coefficient - result.coefficient).abs() < 1e-9);

    let mut entity = Entity::new("sensor.co2", InputType::Co2);
    assert!(entity.refresh(&db, "living", now, &Utc).unwrap());
    assert!(entity.is_continuous_likelihood());
    let (p_true, p_false) = entity.get_likelihoods(Some("805"));
    assert!(p_true > p_false);
    let (p_true, p_false) = entity.get_likelihoods(Some("425"));
    assert!(p_true < p_false);

    let (lower, upper) = entity.learned_active_range.unwrap();
    assert!(lower > 420.0 && lower < 800.0);
    assert!(upper > 800.0);
}

#[test]
fn test_too_few_samples_is_saved_as_error() {
    let db = Database::open_memory().unwrap();
    let occupied = evening_intervals(1);
    db.save_occupied_intervals_cache("living", &occupied, MOTION_CACHE_SOURCE).unwrap();
    seed_co2(&db, &occupied, 1);

    let period = (day_start(), day_start() + Duration::days(1));
    let result = analyze_and_save_correlation(
        &db,
        "living",
        "sensor.co2",
        InputType::Co2,
        period,
        period.1,
        SensorHistory::Numeric,
        &Utc,
    )
    .unwrap()
    .unwrap();
    assert_eq!(result.analysis_error, Some(AnalysisError::TooFewSamples));
    assert_eq!(result.sample_count, 48);

    let mut entity = Entity::new("sensor.co2", InputType::Co2);
    entity.refresh(&db, "living", period.1, &Utc).unwrap();
    assert!(!entity.is_continuous_likelihood());
    assert_eq!(entity.get_likelihoods(Some("800")), (0.5, 0.5));
}

#[test]
fn test_no_occupancy_reports_no_occupied_samples() {
    let db = Database::open_memory().unwrap();
    seed_co2(&db, &[], 2);

    let period = (day_start(), day_start() + Duration::days(2));
    let result = analyze_and_save_correlation(
        &db,
        "living",
        "sensor.co2",
        InputType::Co2,
        period,
        period.1,
        SensorHistory::Numeric,
        &Utc,
    )
    .unwrap()
    .unwrap();
    assert_eq!(result.analysis_error, Some(AnalysisError::NoOccupiedSamples));
}

#[test]
fn test_binary_sensor_as_numeric_history() {
    let db = Database::open_memory().unwrap();
    let occupied = evening_intervals(7);
    db.save_occupied_intervals_cache("living", &occupied, MOTION_CACHE_SOURCE).unwrap();

    // TV plays during every evening, and is off in between, split into hourly states.
    for d in 0..7 {
        let day = day_start() + Duration::days(d);
        for h in 0..24 {
            let state = if (18..22).contains(&h) { "playing" } else { "off" };
            db.insert_state_interval(
                "living",
                &SensorStateInterval {
                    entity_id: "media_player.tv".into(),
                    start: day + Duration::hours(h),
                    end: day + Duration::hours(h + 1),
                    state: state.into(),
                },
            )
            .unwrap();
        }
    }

    let active = vec!["playing".to_string()];
    let period = (day_start(), day_start() + Duration::days(7));
    let result = analyze_and_save_correlation(
        &db,
        "living",
        "media_player.tv",
        InputType::Media,
        period,
        period.1,
        SensorHistory::Binary { active_states: &active },
        &Utc,
    )
    .unwrap()
    .unwrap();
    assert!(result.analysis_error.is_none());
    assert!((result.coefficient - 1.0).abs() < 1e-9);

    let states = db
        .get_state_intervals("living", "media_player.tv", period.0, period.1)
        .unwrap();
    let likelihood = analyze_binary_likelihoods("media_player.tv", &states, &occupied, period, &active).unwrap();
    assert!(save_binary_likelihood_result(&db, "living", &likelihood, InputType::Media));
    let (p_true, p_false) = likelihood.likelihood.pair().unwrap();
    assert_eq!(p_true, 0.95);
    assert_eq!(p_false, 0.05);
}

#[test]
fn test_monthly_retention_keeps_twelve_months() {
    let db = Database::open_memory().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();

    // One failed result per month for 14 months.
    for m in 0..14 {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::days(31 * m);
        let end = start + Duration::days(7);
        analyze_and_save_correlation(
            &db,
            "living",
            "sensor.co2",
            InputType::Co2,
            (start, end),
            now,
            SensorHistory::Numeric,
            &Utc,
        )
        .unwrap();
    }

    let rows = db.list_correlations("living", "sensor.co2").unwrap();
    assert_eq!(rows.len(), 12);
    let oldest = rows.iter().map(|r| r.result.analysis_period_start).min().unwrap();
    assert!(oldest >= Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
}

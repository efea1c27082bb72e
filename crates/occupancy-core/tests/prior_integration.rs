//! Integration tests for the global and time-of-week priors.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::America::New_York;
use occupancy_core::prior::{MAX_PRIOR, MIN_PRIOR};
use occupancy_core::{Database, Prior, Repository, TimeInterval};

fn monday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 0, 0, 0).unwrap()
}

fn evenings() -> Vec<TimeInterval> {
    (0..7)
        .map(|d| {
            let day = monday() + Duration::days(d);
            TimeInterval::new(day + Duration::hours(18), day + Duration::hours(22))
        })
        .collect()
}

#[test]
fn test_prior_update_and_reload() {
    let db = Database::open_memory().unwrap();
    let now = monday() + Duration::days(7);
    let intervals = evenings();

    let mut prior = Prior::new("living");
    let global = prior.update_global_prior(&db, &intervals, now).unwrap();
    // 28 occupied hours over 6 days and 4 hours.
    assert!((global.value - 28.0 / 148.0).abs() < 1e-9);
    assert_eq!(global.interval_count, 7);

    let slots = prior.update_time_priors(&db, &intervals, monday(), now, &Utc);
    assert_eq!(slots.len(), 7 * 4);
    assert!(slots.iter().all(|s| (18..22).contains(&s.hour) && s.value == 0.9 && s.data_points == 1));

    let stored = db.get_global_prior("living").unwrap().unwrap();
    assert_eq!(stored.data_hash, global.data_hash);
    assert_eq!(db.get_time_priors("living").unwrap().len(), 28);

    // A fresh estimator picks everything up from storage.
    let mut reloaded = Prior::new("living");
    assert_eq!(reloaded.time_prior(now, &Utc), None);
    reloaded.load_global_prior(&db);
    reloaded.load_time_priors(&db);
    assert_eq!(reloaded.global_prior, Some(global.value));

    let evening = monday() + Duration::hours(19) + Duration::minutes(30);
    let night = monday() + Duration::hours(3);
    assert_eq!(reloaded.time_prior(evening, &Utc), Some(0.9));
    assert_eq!(reloaded.time_prior(night, &Utc), Some(0.5));

    let evening_value = reloaded.value(evening, &Utc);
    let night_value = reloaded.value(night, &Utc);
    assert!(evening_value > night_value);
    for v in [evening_value, night_value] {
        assert!((MIN_PRIOR..=MAX_PRIOR).contains(&v));
    }
}

#[test]
fn test_time_priors_bucket_in_local_time() {
    let db = Database::open_memory().unwrap();
    let mut prior = Prior::new("living");

    // 18:00-22:00 UTC is 14:00-18:00 EDT.
    let slots = prior.update_time_priors(&db, &evenings(), monday(), monday() + Duration::days(7), &New_York);
    assert!(slots.iter().all(|s| (14..18).contains(&s.hour)));
    assert!(slots.iter().any(|s| s.day_of_week == 0 && s.hour == 14));

    prior.load_time_priors(&db);
    let afternoon = monday() + Duration::hours(18) + Duration::minutes(10);
    assert_eq!(prior.time_prior(afternoon, &New_York), Some(0.9));
}

#[test]
fn test_empty_intervals_keep_previous_global_prior() {
    let db = Database::open_memory().unwrap();
    let now = monday() + Duration::days(7);
    let mut prior = Prior::new("living");
    prior.update_global_prior(&db, &evenings(), now).unwrap();
    let before = prior.global_prior;

    assert!(prior.update_global_prior(&db, &[], now).is_none());
    assert_eq!(prior.global_prior, before);
    assert!(db.get_global_prior("living").unwrap().is_some());
}

#[test]
fn test_min_prior_override_floors_value() {
    let mut prior = Prior::new("hallway").with_min_prior_override(0.6);
    prior.set_global_prior(0.05, monday());
    assert_eq!(prior.value(monday(), &Utc), 0.6);
}

//! Integration tests for the learning cycle.

use chrono::{DateTime, Duration, TimeZone, Utc};
use occupancy_core::correlation::StoredCorrelation;
use occupancy_core::storage::{AnalysisConfig, BinarySensorConfig, NumericSensorConfig};
use occupancy_core::{
    AreaConfig, CoreError, CorrelationResult, Database, DatabaseError, Entity, GlobalPrior, HourlyAggregate,
    InputType, LearningScheduler, Repository, SensorSample, SensorStateInterval, TimeInterval, TimePriorSlot,
};

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 0, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    day_start() + Duration::days(7)
}

fn living_room() -> AreaConfig {
    let mut area = AreaConfig::new("living");
    area.motion_sensors = vec!["binary_sensor.motion".into()];
    area.numeric_sensors = vec![NumericSensorConfig {
        entity_id: "sensor.co2".into(),
        input_type: InputType::Co2,
    }];
    area.binary_sensors = vec![BinarySensorConfig {
        entity_id: "media_player.tv".into(),
        input_type: InputType::Media,
        active_states: None,
    }];
    area
}

fn state(entity_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, state: &str) -> SensorStateInterval {
    SensorStateInterval {
        entity_id: entity_id.into(),
        start,
        end,
        state: state.into(),
    }
}

/// A week of evenings: motion, TV and raised CO2 between 18:00 and 22:00.
fn seed(db: &Database) {
    for d in 0..7 {
        let day = day_start() + Duration::days(d);
        let evening = (day + Duration::hours(18), day + Duration::hours(22));
        for (entity, active) in [("binary_sensor.motion", "on"), ("media_player.tv", "playing")] {
            db.insert_state_interval("living", &state(entity, day, evening.0, "off")).unwrap();
            db.insert_state_interval("living", &state(entity, evening.0, evening.1, active)).unwrap();
            db.insert_state_interval("living", &state(entity, evening.1, day + Duration::days(1), "off"))
                .unwrap();
        }
        for half_hour in 0..48 {
            let ts = day + Duration::minutes(30 * half_hour);
            let occupied = ts >= evening.0 && ts < evening.1;
            db.insert_numeric_sample(
                "living",
                &SensorSample {
                    entity_id: "sensor.co2".into(),
                    timestamp: ts,
                    value: (if occupied { 850.0 } else { 430.0 }) + (half_hour % 5) as f64,
                    unit: None,
                },
            )
            .unwrap();
        }
    }
}

#[test]
fn test_full_learning_cycle() {
    let db = Database::open_memory().unwrap();
    seed(&db);
    let scheduler = LearningScheduler::new();
    let config = AnalysisConfig::default();

    let report = scheduler.run_cycle(&db, &living_room(), &config, now(), &Utc).unwrap();
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert!(report.cache_rebuilt);
    assert_eq!(report.occupied_intervals, 7);
    assert_eq!(report.time_prior_slots, 28);
    assert!(report.global_prior.unwrap() > 0.1);

    assert_eq!(report.correlations.len(), 1);
    assert!(report.correlations[0].saved);
    assert_eq!(report.correlations[0].analysis_error, None);

    assert_eq!(report.binary_likelihoods.len(), 1);
    assert!(report.binary_likelihoods[0].saved);
    assert_eq!(report.binary_likelihoods[0].analysis_error, None);

    let mut co2 = Entity::new("sensor.co2", InputType::Co2);
    assert!(co2.refresh(&db, "living", now(), &Utc).unwrap());
    let (p_true, p_false) = co2.get_likelihoods(Some("850"));
    assert!(p_true > p_false);

    let mut tv = Entity::new("media_player.tv", InputType::Media);
    assert!(tv.refresh(&db, "living", now(), &Utc).unwrap());
    assert_eq!(tv.get_likelihoods(Some("playing")), (0.95, 0.05));

    // The cache written by the first cycle is still fresh.
    let second = scheduler.run_cycle(&db, &living_room(), &config, now(), &Utc).unwrap();
    assert!(!second.cache_rebuilt);
    assert_eq!(second.occupied_intervals, 7);
}

#[test]
fn test_repeated_cycles_keep_one_row_per_month() {
    let db = Database::open_memory().unwrap();
    seed(&db);
    let scheduler = LearningScheduler::new();
    let config = AnalysisConfig::default();

    for hour in 0..5 {
        let report = scheduler
            .run_cycle(&db, &living_room(), &config, now() + Duration::hours(hour), &Utc)
            .unwrap();
        assert!(report.is_clean(), "failures: {:?}", report.failures);
    }

    assert_eq!(db.list_correlations("living", "media_player.tv").unwrap().len(), 1);
    assert_eq!(db.list_correlations("living", "sensor.co2").unwrap().len(), 1);
}

#[test]
fn test_failed_binary_analysis_falls_back_to_type_defaults() {
    let db = Database::open_memory().unwrap();
    let scheduler = LearningScheduler::new();
    let config = AnalysisConfig::default();

    // Motion only, so the TV analysis has nothing to learn from.
    let start = day_start() + Duration::hours(18);
    db.insert_state_interval("living", &state("binary_sensor.motion", start, start + Duration::hours(2), "on"))
        .unwrap();
    let report = scheduler.run_cycle(&db, &living_room(), &config, now(), &Utc).unwrap();
    assert!(report.binary_likelihoods[0].analysis_error.is_some());

    let mut tv = Entity::new("media_player.tv", InputType::Media).with_configured(0.9, 0.1);
    tv.refresh(&db, "living", now(), &Utc).unwrap();
    assert_eq!(tv.get_likelihoods(Some("playing")), (0.65, 0.02));
}

#[test]
fn test_concurrent_cycle_for_same_area_is_refused() {
    let db = Database::open_memory().unwrap();
    let scheduler = LearningScheduler::new();
    let config = AnalysisConfig::default();

    let guard = scheduler.try_acquire("living").unwrap();
    std::thread::scope(|s| {
        s.spawn(|| {
            assert!(matches!(scheduler.try_acquire("living"), Err(CoreError::AreaBusy(_))));
            assert!(scheduler.try_acquire("kitchen").is_ok());
        });
    });
    let refused = scheduler.run_cycle(&db, &living_room(), &config, now(), &Utc);
    assert!(matches!(refused, Err(CoreError::AreaBusy(area)) if area == "living"));

    drop(guard);
    assert!(scheduler.run_cycle(&db, &living_room(), &config, now(), &Utc).is_ok());
}

/// Delegates to a real database but fails reads for one entity.
struct FlakyRepository {
    inner: Database,
    broken_entity: &'static str,
}

impl FlakyRepository {
    fn check(&self, entity_id: &str) -> Result<(), DatabaseError> {
        if entity_id == self.broken_entity {
            return Err(DatabaseError::QueryFailed(format!("disk error reading {entity_id}")));
        }
        Ok(())
    }
}

impl Repository for FlakyRepository {
    fn get_occupied_intervals(
        &self,
        area_name: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimeInterval>, DatabaseError> {
        self.inner.get_occupied_intervals(area_name, period_start, period_end)
    }

    fn occupied_cache_calculated_at(&self, area_name: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        self.inner.occupied_cache_calculated_at(area_name)
    }

    fn save_occupied_intervals_cache(
        &self,
        area_name: &str,
        intervals: &[TimeInterval],
        source: &str,
    ) -> Result<usize, DatabaseError> {
        self.inner.save_occupied_intervals_cache(area_name, intervals, source)
    }

    fn get_numeric_samples(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorSample>, DatabaseError> {
        self.check(entity_id)?;
        self.inner.get_numeric_samples(area_name, entity_id, start, end)
    }

    fn get_hourly_aggregates(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyAggregate>, DatabaseError> {
        self.check(entity_id)?;
        self.inner.get_hourly_aggregates(area_name, entity_id, start, end)
    }

    fn get_state_intervals(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorStateInterval>, DatabaseError> {
        self.check(entity_id)?;
        self.inner.get_state_intervals(area_name, entity_id, start, end)
    }

    fn save_global_prior(&self, area_name: &str, prior: &GlobalPrior) -> Result<(), DatabaseError> {
        self.inner.save_global_prior(area_name, prior)
    }

    fn get_global_prior(&self, area_name: &str) -> Result<Option<GlobalPrior>, DatabaseError> {
        self.inner.get_global_prior(area_name)
    }

    fn save_time_priors(
        &self,
        area_name: &str,
        slots: &[TimePriorSlot],
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.inner.save_time_priors(area_name, slots, period_start, period_end)
    }

    fn get_time_priors(&self, area_name: &str) -> Result<Vec<TimePriorSlot>, DatabaseError> {
        self.inner.get_time_priors(area_name)
    }

    fn upsert_correlation(&self, result: &CorrelationResult) -> Result<i64, DatabaseError> {
        self.inner.upsert_correlation(result)
    }

    fn list_correlations(&self, area_name: &str, entity_id: &str) -> Result<Vec<StoredCorrelation>, DatabaseError> {
        self.inner.list_correlations(area_name, entity_id)
    }

    fn delete_correlations(&self, ids: &[i64]) -> Result<usize, DatabaseError> {
        self.inner.delete_correlations(ids)
    }
}

#[test]
fn test_one_sensor_failure_does_not_abort_cycle() {
    let db = Database::open_memory().unwrap();
    seed(&db);
    let repo = FlakyRepository {
        inner: db,
        broken_entity: "sensor.co2",
    };

    let scheduler = LearningScheduler::new();
    let report = scheduler
        .run_cycle(&repo, &living_room(), &AnalysisConfig::default(), now(), &Utc)
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity_id, "sensor.co2");
    assert_eq!(report.failures[0].stage, "update_correlation");
    assert!(report.correlations.is_empty());

    // The other sensor and the priors still ran.
    assert_eq!(report.binary_likelihoods.len(), 1);
    assert!(report.binary_likelihoods[0].saved);
    assert!(report.global_prior.is_some());
    assert!(repo.inner.list_correlations("living", "sensor.co2").unwrap().is_empty());
}

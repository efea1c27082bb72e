//! Learning cycle orchestration.
//!
//! A cycle rebuilds the occupied cache when stale, refreshes the area's
//! priors, then analyzes every configured sensor. One sensor's storage
//! failure is logged and reported but never stops the others.
//!
//! At most one cycle runs per area at a time; see [`LearningScheduler::try_acquire`].

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::correlation::{
    analyze_and_save_correlation, analyze_binary_likelihoods, prune_old_correlations, save_binary_likelihood_result,
    AnalysisError,
    BinaryLikelihoodResult, CorrelationResult, SensorHistory,
};
use crate::error::{CoreError, DatabaseError};
use crate::intervals::TimeInterval;
use crate::occupied::{is_cache_valid, OccupiedIntervalBuilder};
use crate::prior::{GlobalPrior, Prior};
use crate::sensor::InputType;
use crate::storage::{AnalysisConfig, AreaConfig, BinarySensorConfig, NumericSensorConfig, Repository};

/// Outcome of one sensor's analysis in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorOutcome {
    pub entity_id: String,
    pub input_type: InputType,
    /// `false` when the analysis produced nothing that could be saved.
    pub saved: bool,
    pub analysis_error: Option<AnalysisError>,
}

/// A sensor whose analysis hit a storage error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorFailure {
    pub entity_id: String,
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub area_name: String,
    pub started_at: DateTime<Utc>,
    pub cache_rebuilt: bool,
    pub occupied_intervals: usize,
    pub global_prior: Option<f64>,
    pub time_prior_slots: usize,
    pub correlations: Vec<SensorOutcome>,
    pub binary_likelihoods: Vec<SensorOutcome>,
    pub failures: Vec<SensorFailure>,
}

impl CycleReport {
    fn new(area_name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            area_name: area_name.to_string(),
            started_at,
            cache_rebuilt: false,
            occupied_intervals: 0,
            global_prior: None,
            time_prior_slots: 0,
            correlations: Vec::new(),
            binary_likelihoods: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, entity_id: &str, stage: &'static str, error: &DatabaseError) {
        warn!(area = %self.area_name, entity_id, stage, error = %error, "analysis step failed");
        self.failures.push(SensorFailure {
            entity_id: entity_id.to_string(),
            stage,
            message: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Tracks which areas have a cycle in flight.
#[derive(Debug, Default)]
pub struct LearningScheduler {
    in_flight: Mutex<HashSet<String>>,
}

/// Releases its area when dropped.
#[derive(Debug)]
pub struct AreaGuard<'a> {
    scheduler: &'a LearningScheduler,
    area_name: String,
}

impl AreaGuard<'_> {
    pub fn area_name(&self) -> &str {
        &self.area_name
    }
}

impl Drop for AreaGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.areas().remove(&self.area_name);
    }
}

impl LearningScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn areas(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim an area for a cycle.
    ///
    /// # Errors
    /// Returns [`CoreError::AreaBusy`] when a cycle for the area is already running.
    pub fn try_acquire(&self, area_name: &str) -> Result<AreaGuard<'_>, CoreError> {
        if !self.areas().insert(area_name.to_string()) {
            return Err(CoreError::AreaBusy(area_name.to_string()));
        }
        Ok(AreaGuard {
            scheduler: self,
            area_name: area_name.to_string(),
        })
    }

    pub fn is_running(&self, area_name: &str) -> bool {
        self.areas().contains(area_name)
    }

    /// Run a full learning cycle for one area.
    ///
    /// # Errors
    /// Only [`CoreError::AreaBusy`]; storage failures are recorded in the report.
    pub fn run_cycle<Tz: TimeZone>(
        &self,
        repo: &dyn Repository,
        area: &AreaConfig,
        config: &AnalysisConfig,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<CycleReport, CoreError> {
        let _guard = self.try_acquire(&area.name)?;
        info!(area = %area.name, "learning cycle started");

        let mut report = CycleReport::new(&area.name, now);
        let builder = OccupiedIntervalBuilder::from_config(config);
        let period = (builder.lookback_start(now), now);

        if !is_cache_valid(repo, &area.name, config.cache_max_age_hours, now) {
            match rebuild_occupied_cache(repo, area, &builder, now) {
                Ok(_) => report.cache_rebuilt = true,
                Err(e) => report.fail(&area.name, "rebuild_occupied_cache", &e),
            }
        }

        let occupied = match repo.get_occupied_intervals(&area.name, Some(period.0), Some(period.1)) {
            Ok(intervals) => intervals,
            Err(e) => {
                report.fail(&area.name, "get_occupied_intervals", &e);
                Vec::new()
            }
        };
        report.occupied_intervals = occupied.len();

        let mut prior = Prior::new(area.name.as_str())
            .with_time_weight(config.time_prior_weight)
            .with_min_prior_override(config.min_prior_override);
        let (global, slots) = update_global_and_time_priors(repo, &mut prior, &occupied, period, tz);
        report.global_prior = global.map(|g| g.value);
        report.time_prior_slots = slots;

        for sensor in &area.numeric_sensors {
            match update_correlation(repo, &area.name, sensor, period, now, tz) {
                Ok(result) => report.correlations.push(SensorOutcome {
                    entity_id: sensor.entity_id.clone(),
                    input_type: sensor.input_type,
                    saved: result.is_some(),
                    analysis_error: result.and_then(|r| r.analysis_error),
                }),
                Err(e) => report.fail(&sensor.entity_id, "update_correlation", &e),
            }
        }

        for sensor in &area.binary_sensors {
            match update_binary_likelihood(repo, &area.name, sensor, &occupied, period, tz) {
                Ok(result) => report.binary_likelihoods.push(SensorOutcome {
                    entity_id: sensor.entity_id.clone(),
                    input_type: sensor.input_type,
                    saved: result.is_some(),
                    analysis_error: result.and_then(|r| r.likelihood.analysis_error),
                }),
                Err(e) => report.fail(&sensor.entity_id, "update_binary_likelihood", &e),
            }
        }

        info!(
            area = %area.name,
            occupied = report.occupied_intervals,
            correlations = report.correlations.len(),
            binary = report.binary_likelihoods.len(),
            failures = report.failures.len(),
            "learning cycle finished"
        );
        Ok(report)
    }
}

/// Rebuild the area's occupied cache from its motion sensors.
pub fn rebuild_occupied_cache(
    repo: &dyn Repository,
    area: &AreaConfig,
    builder: &OccupiedIntervalBuilder,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let written = builder.rebuild_occupied_cache(repo, &area.name, &area.motion_sensors, now)?;
    debug!(area = %area.name, written, "occupied cache rebuilt");
    Ok(written)
}

/// Recompute and persist the global prior and the time-of-week slots.
///
/// Returns the new global prior (if any) and the number of slots written.
pub fn update_global_and_time_priors<Tz: TimeZone>(
    repo: &dyn Repository,
    prior: &mut Prior,
    occupied: &[TimeInterval],
    period: (DateTime<Utc>, DateTime<Utc>),
    tz: &Tz,
) -> (Option<GlobalPrior>, usize) {
    let (period_start, period_end) = period;
    let global = prior.update_global_prior(repo, occupied, period_end);
    let slots = prior.update_time_priors(repo, occupied, period_start, period_end, tz);
    (global, slots.len())
}

/// Analyze a numeric sensor against the area's cached occupancy and persist the result.
pub fn update_correlation<Tz: TimeZone>(
    repo: &dyn Repository,
    area_name: &str,
    sensor: &NumericSensorConfig,
    period: (DateTime<Utc>, DateTime<Utc>),
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<Option<CorrelationResult>, DatabaseError> {
    let result = analyze_and_save_correlation(
        repo,
        area_name,
        &sensor.entity_id,
        sensor.input_type,
        period,
        now,
        SensorHistory::Numeric,
        tz,
    )?;
    if let Some(r) = &result {
        debug!(
            area = area_name,
            entity_id = %sensor.entity_id,
            coefficient = r.coefficient,
            correlation_type = r.correlation_type.as_str(),
            "correlation updated"
        );
    }
    Ok(result)
}

/// Learn and persist the duration-weighted likelihoods of a binary sensor,
/// then prune the sensor's stored rows to one per month.
pub fn update_binary_likelihood<Tz: TimeZone>(
    repo: &dyn Repository,
    area_name: &str,
    sensor: &BinarySensorConfig,
    occupied: &[TimeInterval],
    period: (DateTime<Utc>, DateTime<Utc>),
    tz: &Tz,
) -> Result<Option<BinaryLikelihoodResult>, DatabaseError> {
    let (period_start, period_end) = period;
    let states = repo.get_state_intervals(area_name, &sensor.entity_id, period_start, period_end)?;
    let Some(result) = analyze_binary_likelihoods(
        &sensor.entity_id,
        &states,
        occupied,
        period,
        &sensor.active_states(),
    ) else {
        debug!(area = area_name, entity_id = %sensor.entity_id, "no active states configured, skipping");
        return Ok(None);
    };

    if !save_binary_likelihood_result(repo, area_name, &result, sensor.input_type) {
        return Ok(None);
    }
    let pruned = prune_old_correlations(repo, area_name, &sensor.entity_id, tz)?;
    if pruned > 0 {
        debug!(area = area_name, entity_id = %sensor.entity_id, pruned, "pruned old binary likelihoods");
    }
    Ok(Some(result))
}

/// Whether a cycle that last ran at `last_run` is due again.
pub fn cycle_due(last_run: Option<DateTime<Utc>>, every: Duration, now: DateTime<Utc>) -> bool {
    match last_run {
        Some(last) => now - last >= every,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_try_acquire_refuses_second_claim() {
        let scheduler = LearningScheduler::new();
        let guard = scheduler.try_acquire("office").unwrap();
        assert_eq!(guard.area_name(), "office");
        assert!(scheduler.is_running("office"));
        assert!(matches!(scheduler.try_acquire("office"), Err(CoreError::AreaBusy(a)) if a == "office"));

        // Other areas are independent.
        let other = scheduler.try_acquire("kitchen").unwrap();
        drop(other);

        drop(guard);
        assert!(!scheduler.is_running("office"));
        assert!(scheduler.try_acquire("office").is_ok());
    }

    #[test]
    fn test_run_cycle_refused_while_area_claimed() {
        let scheduler = LearningScheduler::new();
        let db = Database::open_memory().unwrap();
        let area = AreaConfig::new("office");
        let _guard = scheduler.try_acquire("office").unwrap();

        let result = scheduler.run_cycle(&db, &area, &AnalysisConfig::default(), Utc::now(), &Utc);
        assert!(matches!(result, Err(CoreError::AreaBusy(_))));
    }

    #[test]
    fn test_run_cycle_on_empty_area() {
        let scheduler = LearningScheduler::new();
        let db = Database::open_memory().unwrap();
        let area = AreaConfig::new("office");

        let report = scheduler
            .run_cycle(&db, &area, &AnalysisConfig::default(), Utc::now(), &Utc)
            .unwrap();
        assert!(report.is_clean());
        assert!(report.cache_rebuilt);
        assert_eq!(report.occupied_intervals, 0);
        assert_eq!(report.global_prior, None);
        assert!(!scheduler.is_running("office"));
    }

    #[test]
    fn test_cycle_due() {
        let now = Utc::now();
        assert!(cycle_due(None, Duration::minutes(30), now));
        assert!(!cycle_due(Some(now - Duration::minutes(10)), Duration::minutes(30), now));
        assert!(cycle_due(Some(now - Duration::minutes(30)), Duration::minutes(30), now));
    }
}

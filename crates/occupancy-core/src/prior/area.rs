use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use super::{
    calculate_global_prior, calculate_time_priors, clamp_probability, combine_priors, slot_key,
    GlobalPrior, TimePriorSlot, DEFAULT_TIME_PRIOR, DEFAULT_TIME_PRIOR_WEIGHT, MAX_PRIOR,
    MIN_PRIOR, PRIOR_FACTOR, TIME_PRIOR_MAX_BOUND, TIME_PRIOR_MIN_BOUND,
};
use crate::intervals::TimeInterval;
use crate::storage::Repository;

/// In-memory prior state of one area.
///
/// The time-prior table is loaded lazily from the repository on first use and
/// dropped whenever the global prior changes.
#[derive(Debug, Clone)]
pub struct Prior {
    pub area_name: String,
    pub global_prior: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub min_prior_override: f64,
    pub time_weight: f64,
    cached_time_priors: Option<HashMap<(u8, u8), f64>>,
}

impl Prior {
    pub fn new(area_name: impl Into<String>) -> Self {
        Self {
            area_name: area_name.into(),
            global_prior: None,
            last_updated: None,
            min_prior_override: 0.0,
            time_weight: DEFAULT_TIME_PRIOR_WEIGHT,
            cached_time_priors: None,
        }
    }

    pub fn with_min_prior_override(mut self, value: f64) -> Self {
        self.min_prior_override = value.clamp(0.0, 1.0);
        self
    }

    pub fn with_time_weight(mut self, weight: f64) -> Self {
        self.time_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn set_global_prior(&mut self, value: f64, now: DateTime<Utc>) {
        self.global_prior = Some(value);
        self.last_updated = Some(now);
        self.invalidate_time_prior_cache();
    }

    pub fn invalidate_time_prior_cache(&mut self) {
        self.cached_time_priors = None;
    }

    /// Forget everything learned in memory.
    pub fn clear_cache(&mut self) {
        self.global_prior = None;
        self.last_updated = None;
        self.invalidate_time_prior_cache();
    }

    /// Recompute the global prior from `intervals` and persist it.
    ///
    /// Empty input keeps the previous value. A failed save is logged; the
    /// in-memory value is updated regardless.
    pub fn update_global_prior(
        &mut self,
        repo: &dyn Repository,
        intervals: &[TimeInterval],
        now: DateTime<Utc>,
    ) -> Option<GlobalPrior> {
        if intervals.is_empty() {
            debug!(area = %self.area_name, "no occupied intervals, keeping previous global prior");
            return None;
        }

        let prior = calculate_global_prior(&self.area_name, intervals, now);
        if let Err(e) = repo.save_global_prior(&self.area_name, &prior) {
            warn!(area = %self.area_name, error = %e, "failed to save global prior");
        }
        self.set_global_prior(prior.value, now);
        debug!(area = %self.area_name, value = prior.value, intervals = prior.interval_count, "global prior updated");
        Some(prior)
    }

    /// Recompute the time-of-week priors over `[period_start, period_end)` and persist them.
    pub fn update_time_priors<Tz: TimeZone>(
        &mut self,
        repo: &dyn Repository,
        intervals: &[TimeInterval],
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        tz: &Tz,
    ) -> Vec<TimePriorSlot> {
        let slots = calculate_time_priors(intervals, period_start, period_end, tz);
        match repo.save_time_priors(&self.area_name, &slots, period_start, period_end) {
            Ok(()) => debug!(area = %self.area_name, slots = slots.len(), "time priors updated"),
            Err(e) => warn!(area = %self.area_name, error = %e, "failed to save time priors"),
        }
        self.cached_time_priors = Some(slots.iter().map(|s| (s.key(), clamp_time_prior(s.value))).collect());
        slots
    }

    /// Populate the time-prior cache from storage if it is empty.
    pub fn load_time_priors(&mut self, repo: &dyn Repository) {
        if self.cached_time_priors.is_some() {
            return;
        }
        match repo.get_time_priors(&self.area_name) {
            Ok(slots) => {
                self.cached_time_priors =
                    Some(slots.iter().map(|s| (s.key(), clamp_time_prior(s.value))).collect());
            }
            Err(e) => {
                warn!(area = %self.area_name, error = %e, "failed to load time priors");
            }
        }
    }

    /// Populate the global prior from storage if it is unset.
    pub fn load_global_prior(&mut self, repo: &dyn Repository) {
        if self.global_prior.is_some() {
            return;
        }
        match repo.get_global_prior(&self.area_name) {
            Ok(Some(stored)) => {
                self.global_prior = Some(stored.value);
                self.last_updated = Some(stored.calculation_date);
            }
            Ok(None) => {}
            Err(e) => warn!(area = %self.area_name, error = %e, "failed to load global prior"),
        }
    }

    /// Time prior of the local `(weekday, hour)` containing `now`.
    ///
    /// Returns `None` until the cache has been loaded.
    pub fn time_prior<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> Option<f64> {
        let cache = self.cached_time_priors.as_ref()?;
        Some(cache.get(&slot_key(now, tz)).copied().unwrap_or(DEFAULT_TIME_PRIOR))
    }

    /// The prior to use at `now`.
    pub fn value<Tz: TimeZone>(&self, now: DateTime<Utc>, tz: &Tz) -> f64 {
        let mut result = match self.global_prior {
            None => MIN_PRIOR,
            Some(global) => {
                let mut prior = clamp_probability(global);
                if let Some(time_prior) = self.time_prior(now, tz) {
                    prior = clamp_probability(combine_priors(prior, time_prior, Some(self.time_weight)));
                }
                prior
            }
        };
        result = (result * PRIOR_FACTOR).clamp(MIN_PRIOR, MAX_PRIOR);
        result.max(self.min_prior_override)
    }
}

fn clamp_time_prior(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_TIME_PRIOR;
    }
    value.clamp(TIME_PRIOR_MIN_BOUND, TIME_PRIOR_MAX_BOUND)
}

//! Occupied-interval builder and its cache.
//!
//! Motion history is the ground truth of occupancy: active motion spans are
//! merged, extended by the motion timeout and cached per area so that the
//! prior and correlation analyses read a single consistent timeline.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::intervals::{apply_motion_timeout, merge_overlapping_intervals, TimeInterval};
use crate::sensor::SensorStateInterval;
use crate::storage::{AnalysisConfig, Repository};

/// Source tag written with caches built from motion history.
pub const MOTION_CACHE_SOURCE: &str = "motion_sensors";

/// State that marks a motion sensor as active.
pub const MOTION_ACTIVE_STATE: &str = "on";

/// Age after which a cached set of occupied intervals is rebuilt.
pub const DEFAULT_CACHE_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupiedIntervalBuilder {
    pub motion_timeout: Duration,
    pub lookback_days: i64,
}

impl OccupiedIntervalBuilder {
    pub fn new(motion_timeout: Duration, lookback_days: i64) -> Self {
        Self {
            motion_timeout,
            lookback_days,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(Duration::seconds(config.motion_timeout_secs as i64), config.lookback_days)
    }

    /// Start of the lookback window ending at `now`.
    pub fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.lookback_days)
    }

    /// Merge active motion spans and apply the motion timeout.
    pub fn build(&self, motion_states: &[SensorStateInterval]) -> Vec<TimeInterval> {
        let raw: Vec<TimeInterval> = motion_states
            .iter()
            .filter(|s| s.state == MOTION_ACTIVE_STATE)
            .map(SensorStateInterval::interval)
            .filter(TimeInterval::is_valid)
            .collect();
        let merged = merge_overlapping_intervals(&raw);
        apply_motion_timeout(&merged, &raw, self.motion_timeout)
    }

    /// Rebuild the area's cache from motion history. Returns the number of
    /// intervals written.
    pub fn rebuild_occupied_cache(
        &self,
        repo: &dyn Repository,
        area_name: &str,
        motion_entity_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let start = self.lookback_start(now);
        let mut states = Vec::new();
        for entity_id in motion_entity_ids {
            let mut entity_states = repo.get_state_intervals(area_name, entity_id, start, now)?;
            debug!(area = area_name, entity_id = %entity_id, states = entity_states.len(), "loaded motion history");
            states.append(&mut entity_states);
        }

        let intervals = self.build(&states);
        if intervals.is_empty() {
            warn!(area = area_name, sensors = motion_entity_ids.len(), "rebuild produced no occupied intervals");
        }
        repo.save_occupied_intervals_cache(area_name, &intervals, MOTION_CACHE_SOURCE)
    }

    /// Cached intervals when the cache is fresh, otherwise rebuild first.
    pub fn occupied_intervals(
        &self,
        repo: &dyn Repository,
        area_name: &str,
        motion_entity_ids: &[String],
        max_age_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeInterval>, DatabaseError> {
        if !is_cache_valid(repo, area_name, max_age_hours, now) {
            let written = self.rebuild_occupied_cache(repo, area_name, motion_entity_ids, now)?;
            debug!(area = area_name, written, "occupied cache rebuilt");
        }
        repo.get_occupied_intervals(area_name, Some(self.lookback_start(now)), Some(now))
    }
}

/// True iff a cache exists and is strictly younger than `max_age_hours`.
pub fn is_cache_valid(repo: &dyn Repository, area_name: &str, max_age_hours: i64, now: DateTime<Utc>) -> bool {
    match repo.occupied_cache_calculated_at(area_name) {
        Ok(Some(calculated_at)) => now - calculated_at < Duration::hours(max_age_hours),
        Ok(None) => false,
        Err(e) => {
            warn!(area = area_name, error = %e, "failed to read occupied cache age");
            false
        }
    }
}

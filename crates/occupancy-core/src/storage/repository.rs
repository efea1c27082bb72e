//! Persistence contract consumed by the learning pipeline.

use chrono::{DateTime, Utc};

use crate::correlation::{CorrelationResult, StoredCorrelation};
use crate::error::DatabaseError;
use crate::intervals::TimeInterval;
use crate::prior::{GlobalPrior, TimePriorSlot};
use crate::sensor::{HourlyAggregate, SensorSample, SensorStateInterval};

/// Storage operations needed by the builder, prior estimator and correlation analyzer.
///
/// Implemented by [`super::Database`]; tests may substitute their own.
pub trait Repository {
    // Occupied-interval cache

    /// Cached occupied intervals for an area, optionally restricted to those
    /// overlapping `[period_start, period_end]`, ordered by start.
    fn get_occupied_intervals(
        &self,
        area_name: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimeInterval>, DatabaseError>;

    /// When the area's cache was last written, `None` when there is no cache.
    fn occupied_cache_calculated_at(&self, area_name: &str) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    /// Replace the area's cache. Returns the number of rows written.
    fn save_occupied_intervals_cache(
        &self,
        area_name: &str,
        intervals: &[TimeInterval],
        source: &str,
    ) -> Result<usize, DatabaseError>;

    // Sensor data

    /// Raw numeric samples with `start <= timestamp <= end`, oldest first.
    fn get_numeric_samples(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorSample>, DatabaseError>;

    /// Hourly aggregates with `start <= period_start < end`, oldest first.
    fn get_hourly_aggregates(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyAggregate>, DatabaseError>;

    /// State intervals overlapping `[start, end]`, oldest first.
    fn get_state_intervals(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorStateInterval>, DatabaseError>;

    // Priors

    fn save_global_prior(&self, area_name: &str, prior: &GlobalPrior) -> Result<(), DatabaseError>;

    fn get_global_prior(&self, area_name: &str) -> Result<Option<GlobalPrior>, DatabaseError>;

    /// Replace all time-prior slots of an area.
    fn save_time_priors(
        &self,
        area_name: &str,
        slots: &[TimePriorSlot],
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    fn get_time_priors(&self, area_name: &str) -> Result<Vec<TimePriorSlot>, DatabaseError>;

    // Correlations

    /// Insert or replace by `(area_name, entity_id, analysis_period_start)`. Returns the row id.
    fn upsert_correlation(&self, result: &CorrelationResult) -> Result<i64, DatabaseError>;

    fn list_correlations(&self, area_name: &str, entity_id: &str) -> Result<Vec<StoredCorrelation>, DatabaseError>;

    /// Returns the number of rows deleted.
    fn delete_correlations(&self, ids: &[i64]) -> Result<usize, DatabaseError>;
}

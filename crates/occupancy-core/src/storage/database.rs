//! SQLite-backed learning storage.
//!
//! Provides persistent storage for:
//! - Sensor history (state intervals, raw numeric samples, hourly aggregates)
//! - The per-area occupied-interval cache
//! - Global and time-of-week priors
//! - Correlation and binary likelihood results
//! - Key-value store for engine state

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::data_dir;
use super::migrations;
use super::repository::Repository;
use super::retry::{with_retry, RetryPolicy};
use crate::correlation::{AnalysisError, CorrelationResult, CorrelationType, StoredCorrelation};
use crate::error::{CoreError, DatabaseError, ValidationError};
use crate::history::aggregate_hourly;
use crate::intervals::TimeInterval;
use crate::prior::{GlobalPrior, TimePriorSlot, TIME_PRIOR_MAX_BOUND, TIME_PRIOR_MIN_BOUND};
use crate::sensor::{HourlyAggregate, InputType, SensorSample, SensorStateInterval};

/// Default source tag of cached occupied intervals.
pub const DEFAULT_CACHE_SOURCE: &str = "merged";

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ValidationError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// SQLite database for learning state.
pub struct Database {
    conn: Connection,
    retry: RetryPolicy,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/occupancy/occupancy.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("occupancy.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open (or create) the database at `path`.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy used for every storage call.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    // Ingestion

    /// Record that `interval.entity_id` held a state. Replaces a row with the same start.
    pub fn insert_state_interval(&self, area_name: &str, interval: &SensorStateInterval) -> Result<(), CoreError> {
        if interval.start > interval.end {
            return Err(ValidationError::InvalidTimeRange {
                start: interval.start,
                end: interval.end,
            }
            .into());
        }
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT OR REPLACE INTO state_intervals (area_name, entity_id, state, start_time, end_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    area_name,
                    interval.entity_id,
                    interval.state,
                    fmt_ts(interval.start),
                    fmt_ts(interval.end),
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Record a numeric reading. Non-finite values are rejected.
    pub fn insert_numeric_sample(&self, area_name: &str, sample: &SensorSample) -> Result<(), CoreError> {
        if !sample.value.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "value".to_string(),
                message: format!("{} is not a finite number", sample.value),
            }
            .into());
        }
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT OR REPLACE INTO numeric_samples (area_name, entity_id, timestamp, value, unit)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    area_name,
                    sample.entity_id,
                    fmt_ts(sample.timestamp),
                    sample.value,
                    sample.unit,
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn insert_hourly_aggregate(&self, area_name: &str, aggregate: &HourlyAggregate) -> Result<(), CoreError> {
        if ![aggregate.avg_value, aggregate.min_value, aggregate.max_value]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ValidationError::InvalidValue {
                field: "avg_value".to_string(),
                message: "aggregate values must be finite".to_string(),
            }
            .into());
        }
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT OR REPLACE INTO numeric_aggregates_hourly
                    (area_name, entity_id, period_start, avg_value, min_value, max_value, sample_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    area_name,
                    aggregate.entity_id,
                    fmt_ts(aggregate.period_start),
                    aggregate.avg_value,
                    aggregate.min_value,
                    aggregate.max_value,
                    aggregate.sample_count,
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Roll raw samples older than `cutoff` into hourly aggregates and delete them.
    ///
    /// Returns the number of raw samples removed.
    pub fn compact_numeric_samples(
        &self,
        area_name: &str,
        entity_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let old = {
            let mut stmt = self.conn.prepare(
                "SELECT entity_id, timestamp, value, unit FROM numeric_samples
                 WHERE area_name = ?1 AND entity_id = ?2 AND timestamp < ?3
                 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(params![area_name, entity_id, fmt_ts(cutoff)], sample_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        if old.is_empty() {
            return Ok(0);
        }

        let aggregates = aggregate_hourly(&old);
        with_retry(&self.retry, || {
            let tx = self.conn.unchecked_transaction()?;
            for aggregate in &aggregates {
                tx.execute(
                    "INSERT OR REPLACE INTO numeric_aggregates_hourly
                        (area_name, entity_id, period_start, avg_value, min_value, max_value, sample_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        area_name,
                        aggregate.entity_id,
                        fmt_ts(aggregate.period_start),
                        aggregate.avg_value,
                        aggregate.min_value,
                        aggregate.max_value,
                        aggregate.sample_count,
                    ],
                )?;
            }
            let removed = tx.execute(
                "DELETE FROM numeric_samples WHERE area_name = ?1 AND entity_id = ?2 AND timestamp < ?3",
                params![area_name, entity_id, fmt_ts(cutoff)],
            )?;
            tx.commit()?;
            debug!(area_name, entity_id, removed, aggregates = aggregates.len(), "compacted numeric samples");
            Ok(removed)
        })
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
            let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
            match result {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<SensorSample> {
    Ok(SensorSample {
        entity_id: row.get(0)?,
        timestamp: ts_column(row, 1)?,
        value: row.get(2)?,
        unit: row.get(3)?,
    })
}

fn correlation_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCorrelation> {
    let analysis_error: Option<String> = row.get(18)?;
    let analysis_error = analysis_error
        .map(|raw| {
            raw.parse::<AnalysisError>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))
        })
        .transpose()?;
    let sample_count: i64 = row.get(8)?;

    Ok(StoredCorrelation {
        id: row.get(0)?,
        result: CorrelationResult {
            area_name: row.get(1)?,
            entity_id: row.get(2)?,
            input_type: parsed_column::<InputType>(row, 3)?,
            coefficient: row.get(4)?,
            p_value: row.get(5)?,
            correlation_type: parsed_column::<CorrelationType>(row, 6)?,
            confidence: row.get(7)?,
            sample_count: sample_count.max(0) as usize,
            mean_value_when_occupied: row.get(9)?,
            mean_value_when_unoccupied: row.get(10)?,
            std_dev_when_occupied: row.get(11)?,
            std_dev_when_unoccupied: row.get(12)?,
            threshold_active: row.get(13)?,
            threshold_inactive: row.get(14)?,
            analysis_period_start: ts_column(row, 15)?,
            analysis_period_end: ts_column(row, 16)?,
            calculation_date: ts_column(row, 17)?,
            analysis_error,
        },
    })
}

impl Repository for Database {
    fn get_occupied_intervals(
        &self,
        area_name: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Vec<TimeInterval>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT start_time, end_time FROM occupied_intervals_cache
                 WHERE area_name = ?1
                   AND (?2 IS NULL OR end_time >= ?2)
                   AND (?3 IS NULL OR start_time <= ?3)
                 ORDER BY start_time",
            )?;
            let rows = stmt.query_map(
                params![area_name, period_start.map(fmt_ts), period_end.map(fmt_ts)],
                |row| Ok(TimeInterval::new(ts_column(row, 0)?, ts_column(row, 1)?)),
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn occupied_cache_calculated_at(&self, area_name: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        with_retry(&self.retry, || {
            let raw: Option<String> = self.conn.query_row(
                "SELECT MAX(calculation_date) FROM occupied_intervals_cache WHERE area_name = ?1",
                params![area_name],
                |row| row.get(0),
            )?;
            raw.map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| DatabaseError::Corrupt {
                        column: "calculation_date".to_string(),
                        message: e.to_string(),
                    })
            })
            .transpose()
        })
    }

    fn save_occupied_intervals_cache(
        &self,
        area_name: &str,
        intervals: &[TimeInterval],
        source: &str,
    ) -> Result<usize, DatabaseError> {
        let source = if source.is_empty() { DEFAULT_CACHE_SOURCE } else { source };
        let calculated_at = fmt_ts(Utc::now());

        with_retry(&self.retry, || {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM occupied_intervals_cache WHERE area_name = ?1",
                params![area_name],
            )?;
            let mut written = 0;
            for interval in intervals.iter().filter(|i| i.is_valid()) {
                written += tx.execute(
                    "INSERT OR IGNORE INTO occupied_intervals_cache
                        (area_name, start_time, end_time, duration_seconds, calculation_date, data_source)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        area_name,
                        fmt_ts(interval.start),
                        fmt_ts(interval.end),
                        interval.duration_secs(),
                        calculated_at,
                        source,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(written)
        })
    }

    fn get_numeric_samples(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorSample>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT entity_id, timestamp, value, unit FROM numeric_samples
                 WHERE area_name = ?1 AND entity_id = ?2 AND timestamp >= ?3 AND timestamp <= ?4
                 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(
                params![area_name, entity_id, fmt_ts(start), fmt_ts(end)],
                sample_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn get_hourly_aggregates(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyAggregate>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT entity_id, period_start, avg_value, min_value, max_value, sample_count
                 FROM numeric_aggregates_hourly
                 WHERE area_name = ?1 AND entity_id = ?2 AND period_start >= ?3 AND period_start < ?4
                 ORDER BY period_start",
            )?;
            let rows = stmt.query_map(params![area_name, entity_id, fmt_ts(start), fmt_ts(end)], |row| {
                Ok(HourlyAggregate {
                    entity_id: row.get(0)?,
                    period_start: ts_column(row, 1)?,
                    avg_value: row.get(2)?,
                    min_value: row.get(3)?,
                    max_value: row.get(4)?,
                    sample_count: row.get(5)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn get_state_intervals(
        &self,
        area_name: &str,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorStateInterval>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT entity_id, start_time, end_time, state FROM state_intervals
                 WHERE area_name = ?1 AND entity_id = ?2 AND end_time >= ?3 AND start_time <= ?4
                 ORDER BY start_time",
            )?;
            let rows = stmt.query_map(params![area_name, entity_id, fmt_ts(start), fmt_ts(end)], |row| {
                Ok(SensorStateInterval {
                    entity_id: row.get(0)?,
                    start: ts_column(row, 1)?,
                    end: ts_column(row, 2)?,
                    state: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn save_global_prior(&self, area_name: &str, prior: &GlobalPrior) -> Result<(), DatabaseError> {
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT OR REPLACE INTO global_priors
                    (area_name, prior_value, data_period_start, data_period_end,
                     total_occupied_seconds, total_period_seconds, interval_count,
                     data_hash, calculation_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    area_name,
                    prior.value,
                    fmt_ts(prior.period_start),
                    fmt_ts(prior.period_end),
                    prior.total_occupied_seconds,
                    prior.total_period_seconds,
                    prior.interval_count as i64,
                    prior.data_hash,
                    fmt_ts(prior.calculation_date),
                ],
            )?;
            Ok(())
        })
    }

    fn get_global_prior(&self, area_name: &str) -> Result<Option<GlobalPrior>, DatabaseError> {
        with_retry(&self.retry, || {
            let prior = self
                .conn
                .query_row(
                    "SELECT prior_value, data_period_start, data_period_end, total_occupied_seconds,
                            total_period_seconds, interval_count, data_hash, calculation_date
                     FROM global_priors WHERE area_name = ?1",
                    params![area_name],
                    |row| {
                        let interval_count: i64 = row.get(5)?;
                        Ok(GlobalPrior {
                            value: row.get(0)?,
                            period_start: ts_column(row, 1)?,
                            period_end: ts_column(row, 2)?,
                            total_occupied_seconds: row.get(3)?,
                            total_period_seconds: row.get(4)?,
                            interval_count: interval_count.max(0) as usize,
                            data_hash: row.get(6)?,
                            calculation_date: ts_column(row, 7)?,
                        })
                    },
                )
                .optional()?;
            Ok(prior)
        })
    }

    fn save_time_priors(
        &self,
        area_name: &str,
        slots: &[TimePriorSlot],
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated_at = fmt_ts(Utc::now());
        with_retry(&self.retry, || {
            let tx = self.conn.unchecked_transaction()?;
            tx.execute("DELETE FROM time_priors WHERE area_name = ?1", params![area_name])?;
            for slot in slots.iter().filter(|s| s.value.is_finite()) {
                tx.execute(
                    "INSERT OR REPLACE INTO time_priors
                        (area_name, day_of_week, time_slot, prior_value, data_points,
                         period_start, period_end, last_updated)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        area_name,
                        slot.day_of_week,
                        slot.hour,
                        slot.value.clamp(TIME_PRIOR_MIN_BOUND, TIME_PRIOR_MAX_BOUND),
                        slot.data_points,
                        fmt_ts(period_start),
                        fmt_ts(period_end),
                        updated_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn get_time_priors(&self, area_name: &str) -> Result<Vec<TimePriorSlot>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT day_of_week, time_slot, prior_value, data_points FROM time_priors
                 WHERE area_name = ?1
                 ORDER BY day_of_week, time_slot",
            )?;
            let rows = stmt.query_map(params![area_name], |row| {
                Ok(TimePriorSlot {
                    day_of_week: row.get(0)?,
                    hour: row.get(1)?,
                    value: row.get(2)?,
                    data_points: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn upsert_correlation(&self, result: &CorrelationResult) -> Result<i64, DatabaseError> {
        if !result.coefficient.is_finite() || !result.p_value.is_finite() || !result.confidence.is_finite() {
            return Err(DatabaseError::QueryFailed(format!(
                "refusing to store non-finite correlation for {}",
                result.entity_id
            )));
        }

        let period_start = fmt_ts(result.analysis_period_start);
        with_retry(&self.retry, || {
            self.conn.execute(
                "INSERT INTO correlations
                    (area_name, entity_id, input_type, correlation_coefficient, p_value,
                     correlation_type, confidence, sample_count,
                     mean_value_when_occupied, mean_value_when_unoccupied,
                     std_dev_when_occupied, std_dev_when_unoccupied,
                     threshold_active, threshold_inactive,
                     analysis_period_start, analysis_period_end, calculation_date, analysis_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                 ON CONFLICT(area_name, entity_id, analysis_period_start) DO UPDATE SET
                    input_type = excluded.input_type,
                    correlation_coefficient = excluded.correlation_coefficient,
                    p_value = excluded.p_value,
                    correlation_type = excluded.correlation_type,
                    confidence = excluded.confidence,
                    sample_count = excluded.sample_count,
                    mean_value_when_occupied = excluded.mean_value_when_occupied,
                    mean_value_when_unoccupied = excluded.mean_value_when_unoccupied,
                    std_dev_when_occupied = excluded.std_dev_when_occupied,
                    std_dev_when_unoccupied = excluded.std_dev_when_unoccupied,
                    threshold_active = excluded.threshold_active,
                    threshold_inactive = excluded.threshold_inactive,
                    analysis_period_end = excluded.analysis_period_end,
                    calculation_date = excluded.calculation_date,
                    analysis_error = excluded.analysis_error",
                params![
                    result.area_name,
                    result.entity_id,
                    result.input_type.as_str(),
                    result.coefficient,
                    result.p_value,
                    result.correlation_type.as_str(),
                    result.confidence,
                    result.sample_count as i64,
                    finite(result.mean_value_when_occupied),
                    finite(result.mean_value_when_unoccupied),
                    finite(result.std_dev_when_occupied),
                    finite(result.std_dev_when_unoccupied),
                    finite(result.threshold_active),
                    finite(result.threshold_inactive),
                    period_start,
                    fmt_ts(result.analysis_period_end),
                    fmt_ts(result.calculation_date),
                    result.analysis_error.map(|e| e.as_str()),
                ],
            )?;
            let id = self.conn.query_row(
                "SELECT id FROM correlations
                 WHERE area_name = ?1 AND entity_id = ?2 AND analysis_period_start = ?3",
                params![result.area_name, result.entity_id, period_start],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(id)
        })
    }

    fn list_correlations(&self, area_name: &str, entity_id: &str) -> Result<Vec<StoredCorrelation>, DatabaseError> {
        with_retry(&self.retry, || {
            let mut stmt = self.conn.prepare(
                "SELECT id, area_name, entity_id, input_type, correlation_coefficient, p_value,
                        correlation_type, confidence, sample_count,
                        mean_value_when_occupied, mean_value_when_unoccupied,
                        std_dev_when_occupied, std_dev_when_unoccupied,
                        threshold_active, threshold_inactive,
                        analysis_period_start, analysis_period_end, calculation_date, analysis_error
                 FROM correlations
                 WHERE area_name = ?1 AND entity_id = ?2
                 ORDER BY analysis_period_start, id",
            )?;
            let rows = stmt.query_map(params![area_name, entity_id], correlation_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn delete_correlations(&self, ids: &[i64]) -> Result<usize, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, || {
            let tx = self.conn.unchecked_transaction()?;
            let mut deleted = 0;
            for id in ids {
                deleted += tx.execute("DELETE FROM correlations WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(deleted)
        })
    }
}

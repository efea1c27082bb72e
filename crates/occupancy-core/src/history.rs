//! Conversion of raw recorder state changes into analyzable history.
//!
//! A state change says "entity X entered state S at time T". Consecutive
//! changes of one entity become [`SensorStateInterval`]s; numeric states
//! become [`SensorSample`]s that can later be rolled up hourly.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::{HourlyAggregate, InputType, SensorSample, SensorStateInterval};

/// Changes older than this are ignored.
pub const RETENTION_DAYS: i64 = 365;
/// Longest plausible `on` interval; anything longer is a stuck sensor.
pub const MAX_INTERVAL_SECONDS: i64 = 46_800;
/// Shortest non-`on` interval kept; shorter ones are flapping.
pub const MIN_INTERVAL_SECONDS: i64 = 10;

const IGNORED_STATES: [&str; 2] = ["unknown", "unavailable"];

/// One state transition as reported by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub entity_id: String,
    pub state: String,
    pub last_changed: DateTime<Utc>,
}

impl StateChange {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>, last_changed: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            last_changed,
        }
    }

    fn is_meaningful(&self) -> bool {
        let state = self.state.trim();
        !state.is_empty() && !IGNORED_STATES.contains(&state)
    }
}

/// Filters applied by [`states_to_intervals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalLimits {
    pub retention_days: i64,
    pub max_on_seconds: i64,
    pub min_seconds: i64,
}

impl Default for IntervalLimits {
    fn default() -> Self {
        Self {
            retention_days: RETENTION_DAYS,
            max_on_seconds: MAX_INTERVAL_SECONDS,
            min_seconds: MIN_INTERVAL_SECONDS,
        }
    }
}

/// Build state intervals from a mixed list of changes.
///
/// Changes are grouped per entity and ordered by `last_changed`. Each interval
/// ends at the entity's next change; the last one ends at `end_time`.
/// Output is ordered by entity, then start.
pub fn states_to_intervals(
    changes: &[StateChange],
    end_time: DateTime<Utc>,
    now: DateTime<Utc>,
    limits: IntervalLimits,
) -> Vec<SensorStateInterval> {
    let retention_cutoff = now - Duration::days(limits.retention_days);

    let mut by_entity: BTreeMap<&str, Vec<&StateChange>> = BTreeMap::new();
    for change in changes
        .iter()
        .filter(|c| c.is_meaningful() && c.last_changed >= retention_cutoff)
    {
        by_entity.entry(change.entity_id.as_str()).or_default().push(change);
    }

    let mut intervals = Vec::new();
    for (entity_id, mut entity_changes) in by_entity {
        entity_changes.sort_by_key(|c| c.last_changed);

        for (idx, change) in entity_changes.iter().enumerate() {
            let start = change.last_changed;
            let end = entity_changes
                .get(idx + 1)
                .map(|next| next.last_changed)
                .unwrap_or(end_time);
            if end < start {
                continue;
            }

            let state = change.state.trim();
            let duration = (end - start).num_seconds();
            if state == "on" && duration > limits.max_on_seconds {
                continue;
            }
            if state != "on" && duration < limits.min_seconds {
                continue;
            }

            intervals.push(SensorStateInterval {
                entity_id: entity_id.to_string(),
                start,
                end,
                state: state.to_string(),
            });
        }
    }
    intervals
}

/// Numeric samples from state changes of a continuous sensor.
///
/// Non-numeric input types yield nothing; unparsable or non-finite states are skipped.
pub fn states_to_numeric_samples(
    changes: &[StateChange],
    input_type: InputType,
    unit: Option<&str>,
) -> Vec<SensorSample> {
    if !input_type.is_numeric() {
        return Vec::new();
    }
    let mut samples: Vec<SensorSample> = changes
        .iter()
        .filter_map(|change| {
            let value = change.state.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
            Some(SensorSample {
                entity_id: change.entity_id.clone(),
                timestamp: change.last_changed,
                value,
                unit: unit.map(str::to_string),
            })
        })
        .collect();
    samples.sort_by_key(|s| s.timestamp);
    samples
}

/// Roll samples up into one aggregate per `(entity, UTC hour)`.
pub fn aggregate_hourly(samples: &[SensorSample]) -> Vec<HourlyAggregate> {
    #[derive(Default)]
    struct Bucket {
        sum: f64,
        min: f64,
        max: f64,
        count: u32,
    }

    let mut buckets: BTreeMap<(&str, DateTime<Utc>), Bucket> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.value.is_finite()) {
        let Ok(hour) = sample.timestamp.duration_trunc(Duration::hours(1)) else {
            continue;
        };
        let bucket = buckets.entry((sample.entity_id.as_str(), hour)).or_insert(Bucket {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ..Bucket::default()
        });
        bucket.sum += sample.value;
        bucket.min = bucket.min.min(sample.value);
        bucket.max = bucket.max.max(sample.value);
        bucket.count += 1;
    }

    buckets
        .into_iter()
        .map(|((entity_id, period_start), bucket)| HourlyAggregate {
            entity_id: entity_id.to_string(),
            period_start,
            avg_value: bucket.sum / f64::from(bucket.count),
            min_value: bucket.min,
            max_value: bucket.max,
            sample_count: bucket.count,
        })
        .collect()
}

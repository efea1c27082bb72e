//! Numeric correlation against occupancy.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::binary::map_binary_state_to_semantic;
use super::pearson::{classify_correlation, correlation_confidence, pearson};
use super::{AnalysisError, CorrelationResult, MIN_CORRELATION_SAMPLES, RETENTION_RAW_NUMERIC_SAMPLES_DAYS};
use crate::error::DatabaseError;
use crate::intervals::{is_timestamp_occupied, TimeInterval};
use crate::sensor::{InputType, SensorSample, SensorStateInterval};
use crate::storage::Repository;

/// How a sensor's history is read for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHistory<'a> {
    /// Raw samples plus hourly aggregates.
    Numeric,
    /// State intervals turned into 0/1 samples.
    Binary { active_states: &'a [String] },
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Correlate sample values with an occupied/unoccupied indicator.
pub fn analyze_numeric_correlation(
    area_name: &str,
    entity_id: &str,
    input_type: InputType,
    samples: &[SensorSample],
    occupied_intervals: &[TimeInterval],
    period: (DateTime<Utc>, DateTime<Utc>),
) -> CorrelationResult {
    let samples: Vec<&SensorSample> = samples.iter().filter(|s| s.value.is_finite()).collect();
    let sample_count = samples.len();
    let failed = |error| CorrelationResult::failed(area_name, entity_id, input_type, period, sample_count, error);

    if sample_count < MIN_CORRELATION_SAMPLES {
        return failed(AnalysisError::TooFewSamples);
    }
    if occupied_intervals.is_empty() {
        return failed(AnalysisError::NoOccupiedSamples);
    }

    let mut values = Vec::with_capacity(sample_count);
    let mut indicator = Vec::with_capacity(sample_count);
    let mut occupied_values = Vec::new();
    let mut unoccupied_values = Vec::new();
    for sample in &samples {
        let occupied = is_timestamp_occupied(sample.timestamp, occupied_intervals);
        values.push(sample.value);
        indicator.push(if occupied { 1.0 } else { 0.0 });
        if occupied {
            occupied_values.push(sample.value);
        } else {
            unoccupied_values.push(sample.value);
        }
    }

    if occupied_values.is_empty() {
        return failed(AnalysisError::NoOccupiedSamples);
    }
    if unoccupied_values.is_empty() {
        return failed(AnalysisError::NoUnoccupiedSamples);
    }

    let (coefficient, p_value) = pearson(&indicator, &values);
    let mean_occupied = mean(&occupied_values);
    let mean_unoccupied = mean(&unoccupied_values);
    let std_occupied = std_dev(&occupied_values, mean_occupied);
    let std_unoccupied = std_dev(&unoccupied_values, mean_unoccupied);

    CorrelationResult {
        area_name: area_name.to_string(),
        entity_id: entity_id.to_string(),
        input_type,
        coefficient,
        p_value,
        correlation_type: classify_correlation(coefficient),
        confidence: correlation_confidence(coefficient, sample_count),
        sample_count,
        mean_value_when_occupied: Some(mean_occupied),
        mean_value_when_unoccupied: Some(mean_unoccupied),
        std_dev_when_occupied: Some(std_occupied),
        std_dev_when_unoccupied: Some(std_unoccupied),
        threshold_active: Some(mean_occupied + std_occupied),
        threshold_inactive: Some(mean_unoccupied - std_unoccupied),
        analysis_period_start: period.0,
        analysis_period_end: period.1,
        calculation_date: Utc::now(),
        analysis_error: None,
    }
}

/// Raw samples from the retention window joined with hourly aggregates before it.
pub fn collect_numeric_samples(
    repo: &dyn Repository,
    area_name: &str,
    entity_id: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<SensorSample>, DatabaseError> {
    let raw_cutoff = now - Duration::days(RETENTION_RAW_NUMERIC_SAMPLES_DAYS);

    let mut samples = repo.get_numeric_samples(area_name, entity_id, period_start.max(raw_cutoff), period_end)?;

    let aggregate_end = raw_cutoff.min(period_end);
    if period_start < aggregate_end {
        let aggregates = repo.get_hourly_aggregates(area_name, entity_id, period_start, aggregate_end)?;
        samples.extend(aggregates.iter().map(|a| a.to_sample()));
    }

    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

/// One 0/1 sample per state interval overlapping the period, at its clipped midpoint.
pub fn convert_intervals_to_samples(
    intervals: &[SensorStateInterval],
    active_states: &[String],
    period: (DateTime<Utc>, DateTime<Utc>),
) -> Vec<SensorSample> {
    if active_states.is_empty() {
        return Vec::new();
    }
    intervals
        .iter()
        .filter_map(|interval| {
            let clipped = interval.interval().clip(period.0, period.1)?;
            let state = map_binary_state_to_semantic(&interval.state, active_states);
            let active = active_states.iter().any(|s| *s == state);
            Some(SensorSample {
                entity_id: interval.entity_id.clone(),
                timestamp: clipped.midpoint(),
                value: if active { 1.0 } else { 0.0 },
                unit: None,
            })
        })
        .collect()
}

/// Load history and occupancy for the period and run the numeric analysis.
///
/// Returns `Ok(None)` for a binary sensor without active states.
pub fn analyze_correlation(
    repo: &dyn Repository,
    area_name: &str,
    entity_id: &str,
    input_type: InputType,
    period: (DateTime<Utc>, DateTime<Utc>),
    now: DateTime<Utc>,
    history: SensorHistory<'_>,
) -> Result<Option<CorrelationResult>, DatabaseError> {
    let (period_start, period_end) = period;
    let samples = match history {
        SensorHistory::Numeric => {
            collect_numeric_samples(repo, area_name, entity_id, period_start, period_end, now)?
        }
        SensorHistory::Binary { active_states } => {
            if active_states.is_empty() {
                return Ok(None);
            }
            let intervals = repo.get_state_intervals(area_name, entity_id, period_start, period_end)?;
            convert_intervals_to_samples(&intervals, active_states, period)
        }
    };
    let occupied = repo.get_occupied_intervals(area_name, Some(period_start), Some(period_end))?;

    debug!(area_name, entity_id, samples = samples.len(), occupied = occupied.len(), "analyzing correlation");
    Ok(Some(analyze_numeric_correlation(
        area_name, entity_id, input_type, &samples, &occupied, period,
    )))
}

//! Correlation and likelihood analysis.
//!
//! Turns a sensor's history plus the area's occupied intervals into
//! reusable likelihood parameters:
//! - continuous sensors get a Pearson coefficient and per-class Gaussian stats
//! - binary sensors get a duration-weighted `(P(active|occupied), P(active|unoccupied))` pair
//!
//! Failures that make a statistic meaningless are reported as an
//! [`AnalysisError`] tag on the result, never as a Rust error.

mod binary;
mod numeric;
mod pearson;
mod store;

pub use binary::{analyze_binary_likelihoods, map_binary_state_to_semantic};
pub use numeric::{
    analyze_correlation, analyze_numeric_correlation, collect_numeric_samples,
    convert_intervals_to_samples, SensorHistory,
};
pub use pearson::{classify_correlation, correlation_confidence, pearson};
pub use store::{
    analyze_and_save_correlation, get_correlation_for_entity, prune_old_correlations,
    save_binary_likelihood_result, save_correlation_result,
};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::sensor::InputType;

/// Minimum number of samples for a numeric correlation.
pub const MIN_CORRELATION_SAMPLES: usize = 50;
/// `|coefficient|` at or above this is a strong correlation.
pub const STRONG_CORRELATION_THRESHOLD: f64 = 0.4;
/// `|coefficient|` at or above this is a (weak) correlation.
pub const WEAK_CORRELATION_THRESHOLD: f64 = 0.15;
/// Binary likelihoods are clamped to `[MIN_BINARY_LIKELIHOOD, MAX_BINARY_LIKELIHOOD]`.
pub const MIN_BINARY_LIKELIHOOD: f64 = 0.05;
pub const MAX_BINARY_LIKELIHOOD: f64 = 0.95;
/// Raw numeric samples are kept this long; older data lives in hourly aggregates.
pub const RETENTION_RAW_NUMERIC_SAMPLES_DAYS: i64 = 14;
/// Monthly correlation history kept per `(area, entity)`.
pub const CORRELATION_MONTHS_TO_KEEP: usize = 12;

/// Why an analysis could not produce a usable statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisError {
    TooFewSamples,
    NoOccupiedSamples,
    NoOccupiedIntervals,
    NoUnoccupiedSamples,
    NoActiveIntervals,
    NoActiveDuringOccupied,
    NoSensorData,
    /// Never analyzed yet, as opposed to a failed run.
    NotAnalyzed,
}

impl AnalysisError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisError::TooFewSamples => "too_few_samples",
            AnalysisError::NoOccupiedSamples => "no_occupied_samples",
            AnalysisError::NoOccupiedIntervals => "no_occupied_intervals",
            AnalysisError::NoUnoccupiedSamples => "no_unoccupied_samples",
            AnalysisError::NoActiveIntervals => "no_active_intervals",
            AnalysisError::NoActiveDuringOccupied => "no_active_during_occupied",
            AnalysisError::NoSensorData => "no_sensor_data",
            AnalysisError::NotAnalyzed => "not_analyzed",
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisError {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "too_few_samples" => AnalysisError::TooFewSamples,
            "no_occupied_samples" => AnalysisError::NoOccupiedSamples,
            "no_occupied_intervals" => AnalysisError::NoOccupiedIntervals,
            "no_unoccupied_samples" => AnalysisError::NoUnoccupiedSamples,
            "no_active_intervals" => AnalysisError::NoActiveIntervals,
            "no_active_during_occupied" => AnalysisError::NoActiveDuringOccupied,
            "no_sensor_data" => AnalysisError::NoSensorData,
            "not_analyzed" => AnalysisError::NotAnalyzed,
            other => {
                return Err(ValidationError::InvalidValue {
                    field: "analysis_error".to_string(),
                    message: format!("unknown analysis error '{other}'"),
                })
            }
        };
        Ok(parsed)
    }
}

/// Qualitative strength and sign of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    StrongPositive,
    Positive,
    #[serde(rename = "none")]
    Uncorrelated,
    Negative,
    StrongNegative,
    /// Row holds a binary likelihood pair rather than a correlation.
    BinaryLikelihood,
}

impl CorrelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationType::StrongPositive => "strong_positive",
            CorrelationType::Positive => "positive",
            CorrelationType::Uncorrelated => "none",
            CorrelationType::Negative => "negative",
            CorrelationType::StrongNegative => "strong_negative",
            CorrelationType::BinaryLikelihood => "binary_likelihood",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, CorrelationType::StrongPositive | CorrelationType::Positive)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, CorrelationType::StrongNegative | CorrelationType::Negative)
    }
}

impl fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "strong_positive" => CorrelationType::StrongPositive,
            "positive" => CorrelationType::Positive,
            "none" => CorrelationType::Uncorrelated,
            "negative" => CorrelationType::Negative,
            "strong_negative" => CorrelationType::StrongNegative,
            "binary_likelihood" => CorrelationType::BinaryLikelihood,
            other => {
                return Err(ValidationError::InvalidValue {
                    field: "correlation_type".to_string(),
                    message: format!("unknown correlation type '{other}'"),
                })
            }
        };
        Ok(parsed)
    }
}

/// Outcome of a correlation analysis for one `(area, entity)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub area_name: String,
    pub entity_id: String,
    pub input_type: InputType,
    pub coefficient: f64,
    pub p_value: f64,
    pub correlation_type: CorrelationType,
    pub confidence: f64,
    pub sample_count: usize,
    pub mean_value_when_occupied: Option<f64>,
    pub mean_value_when_unoccupied: Option<f64>,
    pub std_dev_when_occupied: Option<f64>,
    pub std_dev_when_unoccupied: Option<f64>,
    pub threshold_active: Option<f64>,
    pub threshold_inactive: Option<f64>,
    pub analysis_period_start: DateTime<Utc>,
    pub analysis_period_end: DateTime<Utc>,
    pub calculation_date: DateTime<Utc>,
    pub analysis_error: Option<AnalysisError>,
}

impl CorrelationResult {
    /// A result carrying only an error tag and the sample count.
    pub fn failed(
        area_name: &str,
        entity_id: &str,
        input_type: InputType,
        period: (DateTime<Utc>, DateTime<Utc>),
        sample_count: usize,
        error: AnalysisError,
    ) -> Self {
        Self {
            area_name: area_name.to_string(),
            entity_id: entity_id.to_string(),
            input_type,
            coefficient: 0.0,
            p_value: 1.0,
            correlation_type: CorrelationType::Uncorrelated,
            confidence: 0.0,
            sample_count,
            mean_value_when_occupied: None,
            mean_value_when_unoccupied: None,
            std_dev_when_occupied: None,
            std_dev_when_unoccupied: None,
            threshold_active: None,
            threshold_inactive: None,
            analysis_period_start: period.0,
            analysis_period_end: period.1,
            calculation_date: Utc::now(),
            analysis_error: Some(error),
        }
    }
}

/// A persisted correlation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCorrelation {
    pub id: i64,
    #[serde(flatten)]
    pub result: CorrelationResult,
}

/// Learned `(P(active|occupied), P(active|unoccupied))` for a binary sensor.
///
/// When `analysis_error` is set both probabilities are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnedBinaryLikelihood {
    pub prob_given_true: Option<f64>,
    pub prob_given_false: Option<f64>,
    pub analysis_error: Option<AnalysisError>,
}

impl LearnedBinaryLikelihood {
    pub fn failed(error: AnalysisError) -> Self {
        Self {
            prob_given_true: None,
            prob_given_false: None,
            analysis_error: Some(error),
        }
    }

    pub fn not_analyzed() -> Self {
        Self::failed(AnalysisError::NotAnalyzed)
    }

    /// The learned pair, only when analysis succeeded.
    pub fn pair(&self) -> Option<(f64, f64)> {
        if self.analysis_error.is_some() {
            return None;
        }
        Some((self.prob_given_true?, self.prob_given_false?))
    }
}

/// Binary likelihood analysis output with its analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryLikelihoodResult {
    pub entity_id: String,
    #[serde(flatten)]
    pub likelihood: LearnedBinaryLikelihood,
    pub analysis_period_start: DateTime<Utc>,
    pub analysis_period_end: DateTime<Utc>,
}

//! Per-entity likelihoods consumed by the occupancy decision.
//!
//! An [`Entity`] turns its current state into `(P(state | occupied),
//! P(state | unoccupied))` using whatever has been learned for it so far,
//! falling back to the static defaults of its input type.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::{
    get_correlation_for_entity, AnalysisError, CorrelationResult, CorrelationType, LearnedBinaryLikelihood,
};
use crate::error::DatabaseError;
use crate::sensor::InputType;
use crate::storage::Repository;

/// Floor applied to a learned standard deviation before evaluating densities.
pub const MIN_GAUSSIAN_STD: f64 = 0.05;

const SQRT_TWO_PI: f64 = 2.506_628_274_631_000_7;

/// Per-class normal distribution parameters of a continuous sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnedGaussianParams {
    pub mean_occupied: f64,
    pub std_occupied: f64,
    pub mean_unoccupied: f64,
    pub std_unoccupied: f64,
}

/// How an entity's likelihoods are obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "learned", rename_all = "snake_case")]
pub enum Likelihood {
    /// Fixed configured pair (motion sensors).
    Configured,
    Binary(LearnedBinaryLikelihood),
    Continuous(Option<LearnedGaussianParams>),
}

/// Normal probability density. Zero for a non-positive `std`.
pub fn gaussian_density(x: f64, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return 0.0;
    }
    let z = (x - mean) / std;
    (-0.5 * z * z).exp() / (std * SQRT_TWO_PI)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub input_type: InputType,
    /// Configured pair. Only motion sensors read it; every other kind falls
    /// back to its type defaults when nothing usable has been learned.
    pub prob_given_true: f64,
    pub prob_given_false: f64,
    pub likelihood: Likelihood,
    /// Value range considered "active" for a correlated numeric sensor.
    pub learned_active_range: Option<(f64, f64)>,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, input_type: InputType) -> Self {
        let defaults = input_type.defaults();
        let likelihood = if input_type.is_motion() {
            Likelihood::Configured
        } else if input_type.is_numeric() {
            Likelihood::Continuous(None)
        } else {
            Likelihood::Binary(LearnedBinaryLikelihood::not_analyzed())
        };
        Self {
            entity_id: entity_id.into(),
            input_type,
            prob_given_true: defaults.prob_given_true,
            prob_given_false: defaults.prob_given_false,
            likelihood,
            learned_active_range: None,
        }
    }

    /// Override the configured pair.
    pub fn with_configured(mut self, prob_given_true: f64, prob_given_false: f64) -> Self {
        self.prob_given_true = prob_given_true;
        self.prob_given_false = prob_given_false;
        self
    }

    pub fn weight(&self) -> f64 {
        self.input_type.defaults().weight
    }

    fn configured(&self) -> (f64, f64) {
        (self.prob_given_true, self.prob_given_false)
    }

    fn type_defaults(&self) -> (f64, f64) {
        let defaults = self.input_type.defaults();
        (defaults.prob_given_true, defaults.prob_given_false)
    }

    /// `(P(state | occupied), P(state | unoccupied))` for the current state.
    ///
    /// For continuous sensors `state` is parsed as a number; a missing or
    /// non-finite reading is evaluated at the midpoint of the two means.
    pub fn get_likelihoods(&self, state: Option<&str>) -> (f64, f64) {
        match &self.likelihood {
            Likelihood::Configured => self.configured(),
            Likelihood::Binary(learned) => learned.pair().unwrap_or_else(|| self.type_defaults()),
            Likelihood::Continuous(None) => self.type_defaults(),
            Likelihood::Continuous(Some(params)) => {
                if !params.mean_occupied.is_finite() || !params.mean_unoccupied.is_finite() {
                    return self.type_defaults();
                }
                let x = state
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .filter(|v| v.is_finite())
                    .unwrap_or((params.mean_occupied + params.mean_unoccupied) / 2.0);

                let floor = |std: f64| if std.is_finite() && std > 0.0 { std } else { MIN_GAUSSIAN_STD };
                let p_true = gaussian_density(x, params.mean_occupied, floor(params.std_occupied));
                let p_false = gaussian_density(x, params.mean_unoccupied, floor(params.std_unoccupied));
                if !p_true.is_finite() || !p_false.is_finite() {
                    return self.type_defaults();
                }
                (p_true, p_false)
            }
        }
    }

    /// Apply a binary likelihood analysis. `None` leaves the entity untouched.
    pub fn update_binary_likelihoods(&mut self, result: Option<&LearnedBinaryLikelihood>) {
        let Some(result) = result else {
            return;
        };
        if !matches!(self.likelihood, Likelihood::Binary(_)) {
            return;
        }
        let learned = match (result.analysis_error, result.pair()) {
            (None, Some(_)) => *result,
            (Some(error), _) => LearnedBinaryLikelihood::failed(error),
            (None, None) => LearnedBinaryLikelihood::failed(AnalysisError::NotAnalyzed),
        };
        self.likelihood = Likelihood::Binary(learned);
    }

    /// Apply a numeric correlation result.
    pub fn update_correlation(&mut self, result: &CorrelationResult) {
        if let Likelihood::Continuous(params) = &mut self.likelihood {
            *params = gaussian_params(result);
        }
        self.learned_active_range = if self.input_type.is_numeric() {
            active_range(result)
        } else {
            None
        };
    }

    /// Apply a persisted row, binary likelihood rows included.
    pub fn apply_stored(&mut self, stored: &CorrelationResult) {
        if stored.correlation_type == CorrelationType::BinaryLikelihood {
            let learned = LearnedBinaryLikelihood {
                prob_given_true: stored.mean_value_when_occupied,
                prob_given_false: stored.mean_value_when_unoccupied,
                analysis_error: stored.analysis_error,
            };
            self.update_binary_likelihoods(Some(&learned));
        } else {
            self.update_correlation(stored);
        }
    }

    /// Reload what was last learned for this entity. Returns `false` when
    /// nothing has been stored yet.
    pub fn refresh<Tz: TimeZone>(
        &mut self,
        repo: &dyn Repository,
        area_name: &str,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<bool, DatabaseError> {
        match get_correlation_for_entity(repo, area_name, &self.entity_id, now, tz)? {
            Some(stored) => {
                self.apply_stored(&stored);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_continuous_likelihood(&self) -> bool {
        matches!(self.likelihood, Likelihood::Continuous(Some(_)))
    }

    /// Error of the last binary analysis, if any.
    pub fn analysis_error(&self) -> Option<AnalysisError> {
        match &self.likelihood {
            Likelihood::Binary(learned) => learned.analysis_error,
            _ => None,
        }
    }
}

fn gaussian_params(result: &CorrelationResult) -> Option<LearnedGaussianParams> {
    if result.analysis_error.is_some() {
        return None;
    }
    let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
    Some(LearnedGaussianParams {
        mean_occupied: finite(result.mean_value_when_occupied)?,
        std_occupied: finite(result.std_dev_when_occupied)?,
        mean_unoccupied: finite(result.mean_value_when_unoccupied)?,
        std_unoccupied: finite(result.std_dev_when_unoccupied)?,
    })
}

fn active_range(result: &CorrelationResult) -> Option<(f64, f64)> {
    if result.analysis_error.is_some() {
        return None;
    }
    let mean_occ = result.mean_value_when_occupied?;
    let std_occ = result.std_dev_when_occupied?;
    let mean_unocc = result.mean_value_when_unoccupied?;
    let std_unocc = result.std_dev_when_unoccupied?;

    match result.correlation_type {
        CorrelationType::StrongPositive | CorrelationType::Positive => {
            let lower = mean_unocc + 2.0 * std_unocc;
            let candidate = mean_occ + 2.0 * std_occ;
            let upper = if candidate > lower { candidate } else { f64::INFINITY };
            Some((lower, upper))
        }
        CorrelationType::StrongNegative | CorrelationType::Negative => {
            let upper = mean_unocc - 2.0 * std_unocc;
            let candidate = mean_occ - 2.0 * std_occ;
            let lower = if candidate < upper { candidate } else { f64::NEG_INFINITY };
            Some((lower, upper))
        }
        CorrelationType::Uncorrelated | CorrelationType::BinaryLikelihood => None,
    }
}

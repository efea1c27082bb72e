use super::{DEFAULT_TIME_PRIOR_WEIGHT, MAX_PROBABILITY, MIN_PROBABILITY};

/// Clamp into `[MIN_PROBABILITY, MAX_PROBABILITY]`. NaN maps to the minimum.
pub fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_PROBABILITY;
    }
    value.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Weighted average of two priors in logit space.
///
/// `time_weight` is clamped to `[0, 1]`; `None` uses the default weight.
pub fn combine_priors(area_prior: f64, time_prior: f64, time_weight: Option<f64>) -> f64 {
    let weight = time_weight
        .unwrap_or(DEFAULT_TIME_PRIOR_WEIGHT)
        .clamp(0.0, 1.0);
    let area = clamp_probability(area_prior);
    let time = clamp_probability(time_prior);

    if weight == 0.0 {
        return area;
    }
    if weight == 1.0 {
        return time;
    }

    let combined = (1.0 - weight) * logit(area) + weight * logit(time);
    clamp_probability(sigmoid(combined))
}

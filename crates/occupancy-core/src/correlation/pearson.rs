//! Pearson correlation with a Student-t significance test.

use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{CorrelationType, MIN_CORRELATION_SAMPLES, STRONG_CORRELATION_THRESHOLD, WEAK_CORRELATION_THRESHOLD};

/// Pearson coefficient and two-sided p-value.
///
/// Returns `(0.0, 1.0)` for mismatched lengths, fewer than three samples,
/// any non-finite input or zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> (f64, f64) {
    const UNCORRELATED: (f64, f64) = (0.0, 1.0);

    let n = x.len();
    if n != y.len() || n < 3 {
        return UNCORRELATED;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return UNCORRELATED;
    }

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return UNCORRELATED;
    }

    let r = (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0);
    if !r.is_finite() {
        return UNCORRELATED;
    }

    (r, p_value(r, n))
}

fn p_value(r: f64, n: usize) -> f64 {
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 0.0 {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Bucket a coefficient by strength and sign. Boundaries go to the stronger bucket.
pub fn classify_correlation(coefficient: f64) -> CorrelationType {
    let magnitude = coefficient.abs();
    if magnitude >= STRONG_CORRELATION_THRESHOLD {
        if coefficient > 0.0 {
            CorrelationType::StrongPositive
        } else {
            CorrelationType::StrongNegative
        }
    } else if magnitude >= WEAK_CORRELATION_THRESHOLD {
        if coefficient > 0.0 {
            CorrelationType::Positive
        } else {
            CorrelationType::Negative
        }
    } else {
        CorrelationType::Uncorrelated
    }
}

/// `min(1, |c| * (1 - MIN_CORRELATION_SAMPLES / n))`, never negative.
pub fn correlation_confidence(coefficient: f64, sample_count: usize) -> f64 {
    if sample_count == 0 || !coefficient.is_finite() {
        return 0.0;
    }
    let sufficiency = 1.0 - MIN_CORRELATION_SAMPLES as f64 / sample_count as f64;
    (coefficient.abs() * sufficiency).clamp(0.0, 1.0)
}

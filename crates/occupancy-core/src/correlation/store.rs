//! Persistence and monthly retention of correlation results.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tracing::{debug, warn};

use super::numeric::{analyze_correlation, SensorHistory};
use super::{
    BinaryLikelihoodResult, CorrelationResult, CorrelationType, StoredCorrelation, CORRELATION_MONTHS_TO_KEEP,
};
use crate::error::DatabaseError;
use crate::sensor::InputType;
use crate::storage::Repository;

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Upsert a correlation result. Storage errors are logged and reported as `false`.
///
/// A non-finite coefficient is only accepted on a result that carries an
/// analysis error; it is stored as `0.0`.
pub fn save_correlation_result(repo: &dyn Repository, result: &CorrelationResult) -> bool {
    let mut sanitized = result.clone();
    if !sanitized.coefficient.is_finite() {
        if sanitized.analysis_error.is_none() {
            warn!(entity_id = %result.entity_id, "refusing to save non-finite correlation coefficient");
            return false;
        }
        sanitized.coefficient = 0.0;
    }
    if !sanitized.p_value.is_finite() {
        sanitized.p_value = 1.0;
    }
    if !sanitized.confidence.is_finite() {
        sanitized.confidence = 0.0;
    }
    sanitized.mean_value_when_occupied = finite(sanitized.mean_value_when_occupied);
    sanitized.mean_value_when_unoccupied = finite(sanitized.mean_value_when_unoccupied);
    sanitized.std_dev_when_occupied = finite(sanitized.std_dev_when_occupied);
    sanitized.std_dev_when_unoccupied = finite(sanitized.std_dev_when_unoccupied);
    sanitized.threshold_active = finite(sanitized.threshold_active);
    sanitized.threshold_inactive = finite(sanitized.threshold_inactive);

    match repo.upsert_correlation(&sanitized) {
        Ok(id) => {
            debug!(id, entity_id = %result.entity_id, "saved correlation");
            true
        }
        Err(e) => {
            warn!(entity_id = %result.entity_id, error = %e, "failed to save correlation");
            false
        }
    }
}

/// Store a binary likelihood pair in the correlation table.
pub fn save_binary_likelihood_result(
    repo: &dyn Repository,
    area_name: &str,
    result: &BinaryLikelihoodResult,
    input_type: InputType,
) -> bool {
    let row = CorrelationResult {
        area_name: area_name.to_string(),
        entity_id: result.entity_id.clone(),
        input_type,
        coefficient: 0.0,
        p_value: 1.0,
        correlation_type: CorrelationType::BinaryLikelihood,
        confidence: 0.0,
        sample_count: 0,
        mean_value_when_occupied: result.likelihood.prob_given_true,
        mean_value_when_unoccupied: result.likelihood.prob_given_false,
        std_dev_when_occupied: None,
        std_dev_when_unoccupied: None,
        threshold_active: None,
        threshold_inactive: None,
        analysis_period_start: result.analysis_period_start,
        analysis_period_end: result.analysis_period_end,
        calculation_date: Utc::now(),
        analysis_error: result.likelihood.analysis_error,
    };
    save_correlation_result(repo, &row)
}

/// Analyze, persist and prune in one step.
///
/// Returns the saved result, or `None` when nothing was saved.
#[allow(clippy::too_many_arguments)]
pub fn analyze_and_save_correlation<Tz: TimeZone>(
    repo: &dyn Repository,
    area_name: &str,
    entity_id: &str,
    input_type: InputType,
    period: (DateTime<Utc>, DateTime<Utc>),
    now: DateTime<Utc>,
    history: SensorHistory<'_>,
    tz: &Tz,
) -> Result<Option<CorrelationResult>, DatabaseError> {
    let Some(mut result) = analyze_correlation(repo, area_name, entity_id, input_type, period, now, history)? else {
        return Ok(None);
    };

    if !result.coefficient.is_finite() {
        if result.analysis_error.is_none() {
            warn!(area_name, entity_id, "analysis produced a non-finite coefficient, not saving");
            return Ok(None);
        }
        result.coefficient = 0.0;
    }

    if !save_correlation_result(repo, &result) {
        return Ok(None);
    }
    let pruned = prune_old_correlations(repo, area_name, entity_id, tz)?;
    if pruned > 0 {
        debug!(area_name, entity_id, pruned, "pruned old correlations");
    }
    Ok(Some(result))
}

fn local_month<Tz: TimeZone>(ts: DateTime<Utc>, tz: &Tz) -> (i32, u32) {
    let local = ts.with_timezone(tz);
    (local.year(), local.month())
}

/// Keep one row per local month (the latest calculation) for the newest months.
///
/// Returns the number of rows deleted.
pub fn prune_old_correlations<Tz: TimeZone>(
    repo: &dyn Repository,
    area_name: &str,
    entity_id: &str,
    tz: &Tz,
) -> Result<usize, DatabaseError> {
    let rows = repo.list_correlations(area_name, entity_id)?;

    let mut by_month: BTreeMap<(i32, u32), Vec<&StoredCorrelation>> = BTreeMap::new();
    for row in &rows {
        by_month
            .entry(local_month(row.result.analysis_period_start, tz))
            .or_default()
            .push(row);
    }

    let mut to_delete = Vec::new();
    let month_count = by_month.len();
    for (idx, (_, mut month_rows)) in by_month.into_iter().enumerate() {
        month_rows.sort_by_key(|r| (r.result.calculation_date, r.id));
        if idx + CORRELATION_MONTHS_TO_KEEP >= month_count {
            month_rows.pop();
        }
        to_delete.extend(month_rows.iter().map(|r| r.id));
    }

    if to_delete.is_empty() {
        return Ok(0);
    }
    repo.delete_correlations(&to_delete)
}

/// The correlation to use now: this local month's row, else the latest calculated.
pub fn get_correlation_for_entity<Tz: TimeZone>(
    repo: &dyn Repository,
    area_name: &str,
    entity_id: &str,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<Option<CorrelationResult>, DatabaseError> {
    let rows = repo.list_correlations(area_name, entity_id)?;
    let current_month = local_month(now, tz);

    let latest = |candidates: Vec<&StoredCorrelation>| {
        candidates
            .into_iter()
            .max_by_key(|r| (r.result.calculation_date, r.id))
            .map(|r| r.result.clone())
    };

    let this_month: Vec<&StoredCorrelation> = rows
        .iter()
        .filter(|r| local_month(r.result.analysis_period_start, tz) == current_month)
        .collect();
    if !this_month.is_empty() {
        return Ok(latest(this_month));
    }
    Ok(latest(rows.iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{AnalysisError, LearnedBinaryLikelihood};
    use crate::storage::Database;
    use chrono::Duration;

    fn month_start(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 1, 12, 0, 0).unwrap()
    }

    fn result(start: DateTime<Utc>, calculated: DateTime<Utc>, coefficient: f64) -> CorrelationResult {
        CorrelationResult {
            area_name: "living".into(),
            entity_id: "sensor.co2".into(),
            input_type: InputType::Co2,
            coefficient,
            p_value: 0.01,
            correlation_type: CorrelationType::StrongPositive,
            confidence: 0.6,
            sample_count: 200,
            mean_value_when_occupied: Some(700.0),
            mean_value_when_unoccupied: Some(450.0),
            std_dev_when_occupied: Some(40.0),
            std_dev_when_unoccupied: Some(30.0),
            threshold_active: Some(740.0),
            threshold_inactive: Some(420.0),
            analysis_period_start: start,
            analysis_period_end: start + Duration::days(7),
            calculation_date: calculated,
            analysis_error: None,
        }
    }

    #[test]
    fn test_save_sanitizes_non_finite_fields() {
        let db = Database::open_memory().unwrap();
        let mut r = result(month_start(2025, 1), month_start(2025, 1), 0.5);
        r.threshold_active = Some(f64::INFINITY);
        assert!(save_correlation_result(&db, &r));
        let rows = db.list_correlations("living", "sensor.co2").unwrap();
        assert_eq!(rows[0].result.threshold_active, None);
        assert_eq!(rows[0].result.mean_value_when_occupied, Some(700.0));
    }

    #[test]
    fn test_save_refuses_nan_without_error() {
        let db = Database::open_memory().unwrap();
        let r = result(month_start(2025, 1), month_start(2025, 1), f64::NAN);
        assert!(!save_correlation_result(&db, &r));
        assert!(db.list_correlations("living", "sensor.co2").unwrap().is_empty());
    }

    #[test]
    fn test_save_nan_with_error_stores_zero() {
        let db = Database::open_memory().unwrap();
        let mut r = result(month_start(2025, 1), month_start(2025, 1), f64::NAN);
        r.analysis_error = Some(AnalysisError::TooFewSamples);
        assert!(save_correlation_result(&db, &r));
        let rows = db.list_correlations("living", "sensor.co2").unwrap();
        assert_eq!(rows[0].result.coefficient, 0.0);
        assert_eq!(rows[0].result.analysis_error, Some(AnalysisError::TooFewSamples));
    }

    #[test]
    fn test_binary_likelihood_stored_in_mean_columns() {
        let db = Database::open_memory().unwrap();
        let binary = BinaryLikelihoodResult {
            entity_id: "media_player.tv".into(),
            likelihood: LearnedBinaryLikelihood {
                prob_given_true: Some(0.7),
                prob_given_false: Some(0.1),
                analysis_error: None,
            },
            analysis_period_start: month_start(2025, 3),
            analysis_period_end: month_start(2025, 4),
        };
        assert!(save_binary_likelihood_result(&db, "living", &binary, InputType::Media));
        let rows = db.list_correlations("living", "media_player.tv").unwrap();
        assert_eq!(rows[0].result.correlation_type, CorrelationType::BinaryLikelihood);
        assert_eq!(rows[0].result.mean_value_when_occupied, Some(0.7));
        assert_eq!(rows[0].result.mean_value_when_unoccupied, Some(0.1));
    }

    #[test]
    fn test_prune_keeps_latest_per_month() {
        let db = Database::open_memory().unwrap();
        let start = month_start(2025, 5);
        db.upsert_correlation(&result(start, start + Duration::days(1), 0.5)).unwrap();
        db.upsert_correlation(&result(start + Duration::days(3), start + Duration::days(9), 0.6)).unwrap();
        db.upsert_correlation(&result(start + Duration::days(7), start + Duration::days(8), 0.7)).unwrap();

        assert_eq!(prune_old_correlations(&db, "living", "sensor.co2", &Utc).unwrap(), 2);
        let rows = db.list_correlations("living", "sensor.co2").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result.coefficient, 0.6);
    }

    #[test]
    fn test_prune_keeps_twelve_months() {
        let db = Database::open_memory().unwrap();
        for offset in 0..14u32 {
            let (year, month) = if offset < 12 { (2024, offset + 1) } else { (2025, offset - 11) };
            let start = month_start(year, month);
            db.upsert_correlation(&result(start, start, 0.5)).unwrap();
        }
        assert_eq!(prune_old_correlations(&db, "living", "sensor.co2", &Utc).unwrap(), 2);
        let rows = db.list_correlations("living", "sensor.co2").unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].result.analysis_period_start, month_start(2024, 3));
    }

    #[test]
    fn test_prune_groups_by_local_month() {
        let db = Database::open_memory().unwrap();
        // 2025-03-01 02:00 UTC is still February in New York.
        let late_feb_local = Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();
        let march = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        db.upsert_correlation(&result(late_feb_local, late_feb_local, 0.5)).unwrap();
        db.upsert_correlation(&result(march, march, 0.6)).unwrap();

        assert_eq!(prune_old_correlations(&db, "living", "sensor.co2", &chrono_tz::America::New_York).unwrap(), 0);
        assert_eq!(prune_old_correlations(&db, "living", "sensor.co2", &Utc).unwrap(), 1);
    }

    #[test]
    fn test_get_prefers_current_month() {
        let db = Database::open_memory().unwrap();
        let april = month_start(2025, 4);
        let may = month_start(2025, 5);
        db.upsert_correlation(&result(april, may + Duration::days(20), 0.4)).unwrap();
        db.upsert_correlation(&result(may, may + Duration::days(1), 0.8)).unwrap();

        let now = may + Duration::days(10);
        let found = get_correlation_for_entity(&db, "living", "sensor.co2", now, &Utc).unwrap().unwrap();
        assert_eq!(found.coefficient, 0.8);
    }

    #[test]
    fn test_get_falls_back_to_latest_calculation() {
        let db = Database::open_memory().unwrap();
        let jan = month_start(2025, 1);
        let feb = month_start(2025, 2);
        db.upsert_correlation(&result(jan, feb + Duration::days(5), 0.3)).unwrap();
        db.upsert_correlation(&result(feb, feb + Duration::days(1), 0.9)).unwrap();

        let now = month_start(2025, 6);
        let found = get_correlation_for_entity(&db, "living", "sensor.co2", now, &Utc).unwrap().unwrap();
        assert_eq!(found.coefficient, 0.3);
    }

    #[test]
    fn test_get_without_rows_is_none() {
        let db = Database::open_memory().unwrap();
        assert!(get_correlation_for_entity(&db, "living", "sensor.co2", Utc::now(), &Utc).unwrap().is_none());
    }
}

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use super::{TimePriorSlot, TIME_PRIOR_MAX_BOUND, TIME_PRIOR_MIN_BOUND};
use crate::intervals::{clip_to_period, merge_overlapping_intervals};

/// `(day_of_week, hour)` of an instant in `tz`, Monday = 0.
pub fn slot_key<Tz: TimeZone>(instant: DateTime<Utc>, tz: &Tz) -> (u8, u8) {
    let local = instant.with_timezone(tz);
    (local.weekday().num_days_from_monday() as u8, local.hour() as u8)
}

#[derive(Default)]
struct SlotAccumulator {
    occupied_secs: f64,
    /// Local dates on which the slot saw occupancy; one per observed week.
    observed_dates: BTreeSet<NaiveDate>,
}

/// Time-of-week priors from occupied intervals, bucketed in local time.
///
/// Each slot's denominator is the real elapsed time the local hour spans on
/// every date it was observed, so a repeated hour at a DST fall-back counts
/// as two hours. Slots without observations are omitted.
pub fn calculate_time_priors<Tz: TimeZone>(
    intervals: &[crate::intervals::TimeInterval],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    tz: &Tz,
) -> Vec<TimePriorSlot> {
    let clipped = clip_to_period(intervals, period_start, period_end);
    let merged = merge_overlapping_intervals(&clipped);

    let mut slots: BTreeMap<(u8, u8), SlotAccumulator> = BTreeMap::new();

    for interval in &merged {
        let mut cursor = interval.start;
        while cursor < interval.end {
            let local = cursor.with_timezone(tz);
            let into_hour = Duration::seconds(i64::from(local.minute() * 60 + local.second()))
                + Duration::nanoseconds(i64::from(local.nanosecond()));
            let bucket_end = cursor - into_hour + Duration::hours(1);
            let segment_end = bucket_end.min(interval.end);

            let key = (local.weekday().num_days_from_monday() as u8, local.hour() as u8);
            let slot = slots.entry(key).or_default();
            slot.occupied_secs += (segment_end - cursor).num_milliseconds() as f64 / 1000.0;
            slot.observed_dates.insert(local.date_naive());

            cursor = segment_end;
        }
    }

    slots
        .into_iter()
        .filter_map(|((day_of_week, hour), slot)| {
            let observed_secs: f64 = slot
                .observed_dates
                .iter()
                .map(|date| local_hour_span_secs(tz, *date, u32::from(hour)))
                .sum();
            if observed_secs <= 0.0 || slot.occupied_secs <= 0.0 {
                return None;
            }
            let value = (slot.occupied_secs / observed_secs).clamp(TIME_PRIOR_MIN_BOUND, TIME_PRIOR_MAX_BOUND);
            Some(TimePriorSlot {
                day_of_week,
                hour,
                value,
                data_points: slot.observed_dates.len() as u32,
            })
        })
        .collect()
}

/// Real seconds covered by local hour `hour` on `date`.
///
/// 3600 normally, 7200 for a repeated fall-back hour, 0 for a skipped hour.
fn local_hour_span_secs<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> f64 {
    let Some(naive_start) = date.and_hms_opt(hour, 0, 0) else {
        return 0.0;
    };
    let naive_end = naive_start + Duration::hours(1);

    let Some(start) = tz.from_local_datetime(&naive_start).earliest() else {
        return 0.0;
    };
    let start = start.with_timezone(&Utc);
    let end = match tz.from_local_datetime(&naive_end).earliest() {
        Some(end) => end.with_timezone(&Utc),
        // Next hour falls in a spring-forward gap.
        None => start + Duration::hours(1),
    };
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

//! Interval algebra over `[start, end)` time ranges.
//!
//! Pure functions used to turn motion activity into occupied time:
//! merging, overlap lookup, timeout-aware segmentation and point membership.
//! Every function here discards intervals with `start > end`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Create an interval without validating ordering.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Create an interval, rejecting `start > end`.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// `start <= end`.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Duration in seconds (fractional, millisecond precision).
    pub fn duration_secs(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }

    /// Left-inclusive, right-exclusive membership.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Intersection with `[start, end)`, or `None` when empty.
    pub fn clip(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        let clipped_start = self.start.max(start);
        let clipped_end = self.end.min(end);
        if clipped_start < clipped_end {
            Some(Self::new(clipped_start, clipped_end))
        } else {
            None
        }
    }

    /// Seconds shared with `other`.
    pub fn overlap_secs(&self, other: &TimeInterval) -> f64 {
        self.clip(other.start, other.end)
            .map(|i| i.duration_secs())
            .unwrap_or(0.0)
    }

    /// Midpoint of the interval.
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + self.duration() / 2
    }
}

impl From<(DateTime<Utc>, DateTime<Utc>)> for TimeInterval {
    fn from((start, end): (DateTime<Utc>, DateTime<Utc>)) -> Self {
        Self::new(start, end)
    }
}

/// Merge overlapping or touching intervals into a sorted, disjoint list.
pub fn merge_overlapping_intervals(intervals: &[TimeInterval]) -> Vec<TimeInterval> {
    let mut sorted: Vec<TimeInterval> = intervals.iter().copied().filter(|i| i.is_valid()).collect();
    sorted.sort_by_key(|i| (i.start, i.end));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(current) if interval.start <= current.end => {
                if interval.end > current.end {
                    current.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Motion intervals overlapping `reference`, boundary contact included.
///
/// Returned intervals are the original, unclipped motion intervals.
pub fn find_overlapping_motion_intervals(
    reference: &TimeInterval,
    motion_intervals: &[TimeInterval],
) -> Vec<TimeInterval> {
    motion_intervals
        .iter()
        .filter(|m| m.is_valid())
        .filter(|m| m.start <= reference.end && m.end >= reference.start)
        .copied()
        .collect()
}

/// Partition `reference` into alternating idle and motion-plus-timeout pieces.
///
/// Each motion piece ends at `motion.end + timeout`, never past
/// `reference.end`. A timeout running into the next motion start extends the
/// same piece instead of producing an overlap.
pub fn segment_interval_with_motion(
    reference: &TimeInterval,
    motion_intervals: &[TimeInterval],
    timeout: Duration,
) -> Vec<TimeInterval> {
    if !reference.is_valid() {
        return Vec::new();
    }

    let mut overlapping = find_overlapping_motion_intervals(reference, motion_intervals);
    if overlapping.is_empty() {
        return vec![*reference];
    }
    overlapping.sort_by_key(|m| (m.start, m.end));

    let mut segments: Vec<TimeInterval> = Vec::new();
    let mut cursor = reference.start;
    let mut last_was_motion = false;

    for motion in overlapping {
        if cursor >= reference.end {
            break;
        }
        let motion_start = motion.start.max(cursor);
        if motion_start >= reference.end {
            break;
        }
        let motion_end = (motion.end + timeout).min(reference.end);
        if motion_end <= motion_start {
            // Already covered by the previous piece.
            continue;
        }

        if motion_start > cursor {
            segments.push(TimeInterval::new(cursor, motion_start));
            last_was_motion = false;
        }

        match segments.last_mut() {
            Some(previous) if last_was_motion && previous.end == motion_start => {
                previous.end = motion_end;
            }
            _ => segments.push(TimeInterval::new(motion_start, motion_end)),
        }
        last_was_motion = true;
        cursor = motion_end;
    }

    if segments.is_empty() {
        return vec![*reference];
    }
    if cursor < reference.end {
        segments.push(TimeInterval::new(cursor, reference.end));
    }
    segments
}

/// Segment each merged interval by motion, then merge across boundaries.
pub fn apply_motion_timeout(
    merged_intervals: &[TimeInterval],
    motion_intervals: &[TimeInterval],
    timeout: Duration,
) -> Vec<TimeInterval> {
    let segments: Vec<TimeInterval> = merged_intervals
        .iter()
        .flat_map(|interval| segment_interval_with_motion(interval, motion_intervals, timeout))
        .collect();
    merge_overlapping_intervals(&segments)
}

/// True iff some interval satisfies `start <= timestamp < end`.
pub fn is_timestamp_occupied(timestamp: DateTime<Utc>, occupied_intervals: &[TimeInterval]) -> bool {
    occupied_intervals
        .iter()
        .any(|interval| interval.is_valid() && interval.contains(timestamp))
}

/// Total covered seconds after merging.
pub fn total_occupied_seconds(intervals: &[TimeInterval]) -> f64 {
    merge_overlapping_intervals(intervals)
        .iter()
        .map(TimeInterval::duration_secs)
        .sum()
}

/// Intersect every valid interval with `[start, end)`, dropping empty results.
pub fn clip_to_period(
    intervals: &[TimeInterval],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TimeInterval> {
    intervals
        .iter()
        .filter(|i| i.is_valid())
        .filter_map(|i| i.clip(start, end))
        .collect()
}

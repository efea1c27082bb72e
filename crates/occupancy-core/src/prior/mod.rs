//! Occupancy prior estimation.
//!
//! Two estimates are learned from the occupied intervals of an area:
//! - a single global prior over the whole observed period
//! - a sparse 7x24 grid of time-of-week priors computed in local time
//!
//! [`Prior`] holds the in-memory state for one area and resolves the prior to
//! use at a given instant by combining both.

mod area;
mod combine;
mod global;
mod time_slots;

pub use area::Prior;
pub use combine::{clamp_probability, combine_priors};
pub use global::{calculate_global_prior, create_data_hash};
pub use time_slots::{calculate_time_priors, slot_key};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lower clamp for any probability.
pub const MIN_PROBABILITY: f64 = 0.01;
/// Upper clamp for any probability.
pub const MAX_PROBABILITY: f64 = 0.99;
/// Time-slot priors are kept inside `[TIME_PRIOR_MIN_BOUND, TIME_PRIOR_MAX_BOUND]`.
pub const TIME_PRIOR_MIN_BOUND: f64 = 0.1;
pub const TIME_PRIOR_MAX_BOUND: f64 = 0.9;
/// Used for slots with no observations.
pub const DEFAULT_TIME_PRIOR: f64 = 0.5;
/// Default weight of the time prior against the global prior.
pub const DEFAULT_TIME_PRIOR_WEIGHT: f64 = 0.2;
/// Multiplier applied to the combined prior.
pub const PRIOR_FACTOR: f64 = 1.05;
/// Bounds of the resolved area prior.
pub const MIN_PRIOR: f64 = 0.1;
pub const MAX_PRIOR: f64 = 0.99;

/// Area-wide occupancy probability and the data it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalPrior {
    pub value: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_occupied_seconds: f64,
    pub total_period_seconds: f64,
    pub interval_count: usize,
    pub data_hash: String,
    pub calculation_date: DateTime<Utc>,
}

/// Occupancy probability for one `(day_of_week, hour)` bucket.
///
/// `day_of_week` is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePriorSlot {
    pub day_of_week: u8,
    pub hour: u8,
    pub value: f64,
    /// Distinct weeks in which this slot had observed occupancy.
    pub data_points: u32,
}

impl TimePriorSlot {
    pub fn key(&self) -> (u8, u8) {
        (self.day_of_week, self.hour)
    }

    /// Get day name abbreviation.
    pub fn day_name(&self) -> &'static str {
        match self.day_of_week {
            0 => "Mon",
            1 => "Tue",
            2 => "Wed",
            3 => "Thu",
            4 => "Fri",
            5 => "Sat",
            6 => "Sun",
            _ => "?",
        }
    }
}

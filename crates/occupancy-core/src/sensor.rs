//! Sensor input types and the raw history records the analyzers consume.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::intervals::TimeInterval;

/// Kind of sensor feeding evidence into an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Motion,
    Media,
    Appliance,
    Door,
    Window,
    Cover,
    Sleep,
    Temperature,
    Humidity,
    Illuminance,
    Co2,
    Co,
    SoundPressure,
    Pressure,
    AirQuality,
    Voc,
    Pm25,
    Pm10,
    Power,
    Unknown,
}

/// Static calibration for an input type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypeDefaults {
    pub weight: f64,
    pub prob_given_true: f64,
    pub prob_given_false: f64,
    pub active_states: &'static [&'static str],
}

impl InputType {
    pub const ALL: [InputType; 20] = [
        InputType::Motion,
        InputType::Media,
        InputType::Appliance,
        InputType::Door,
        InputType::Window,
        InputType::Cover,
        InputType::Sleep,
        InputType::Temperature,
        InputType::Humidity,
        InputType::Illuminance,
        InputType::Co2,
        InputType::Co,
        InputType::SoundPressure,
        InputType::Pressure,
        InputType::AirQuality,
        InputType::Voc,
        InputType::Pm25,
        InputType::Pm10,
        InputType::Power,
        InputType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Motion => "motion",
            InputType::Media => "media",
            InputType::Appliance => "appliance",
            InputType::Door => "door",
            InputType::Window => "window",
            InputType::Cover => "cover",
            InputType::Sleep => "sleep",
            InputType::Temperature => "temperature",
            InputType::Humidity => "humidity",
            InputType::Illuminance => "illuminance",
            InputType::Co2 => "co2",
            InputType::Co => "co",
            InputType::SoundPressure => "sound_pressure",
            InputType::Pressure => "pressure",
            InputType::AirQuality => "air_quality",
            InputType::Voc => "voc",
            InputType::Pm25 => "pm25",
            InputType::Pm10 => "pm10",
            InputType::Power => "power",
            InputType::Unknown => "unknown",
        }
    }

    /// Sensors reporting a continuous numeric value.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            InputType::Temperature
                | InputType::Humidity
                | InputType::Illuminance
                | InputType::Co2
                | InputType::Co
                | InputType::SoundPressure
                | InputType::Pressure
                | InputType::AirQuality
                | InputType::Voc
                | InputType::Pm25
                | InputType::Pm10
                | InputType::Power
        )
    }

    pub fn is_motion(&self) -> bool {
        matches!(self, InputType::Motion)
    }

    /// Sensors whose evidence is an enumerated state.
    pub fn is_binary(&self) -> bool {
        !self.is_numeric() && !self.is_motion()
    }

    pub fn defaults(&self) -> TypeDefaults {
        match self {
            InputType::Motion => TypeDefaults {
                weight: 0.85,
                prob_given_true: 0.95,
                prob_given_false: 0.02,
                active_states: &["on"],
            },
            InputType::Media => TypeDefaults {
                weight: 0.7,
                prob_given_true: 0.65,
                prob_given_false: 0.02,
                active_states: &["playing", "paused"],
            },
            InputType::Appliance => TypeDefaults {
                weight: 0.4,
                prob_given_true: 0.2,
                prob_given_false: 0.02,
                active_states: &["on", "standby"],
            },
            InputType::Door => TypeDefaults {
                weight: 0.3,
                prob_given_true: 0.2,
                prob_given_false: 0.02,
                active_states: &["closed"],
            },
            InputType::Window => TypeDefaults {
                weight: 0.2,
                prob_given_true: 0.2,
                prob_given_false: 0.02,
                active_states: &["open"],
            },
            InputType::Cover => TypeDefaults {
                weight: 0.3,
                prob_given_true: 0.2,
                prob_given_false: 0.02,
                active_states: &["opening", "closing"],
            },
            InputType::Sleep => TypeDefaults {
                weight: 0.9,
                prob_given_true: 0.9,
                prob_given_false: 0.05,
                active_states: &["on"],
            },
            InputType::Power => TypeDefaults {
                weight: 0.3,
                prob_given_true: 0.5,
                prob_given_false: 0.5,
                active_states: &[],
            },
            InputType::Unknown => TypeDefaults {
                weight: 0.5,
                prob_given_true: 0.5,
                prob_given_false: 0.5,
                active_states: &[],
            },
            // Environmental sensors
            _ => TypeDefaults {
                weight: 0.1,
                prob_given_true: 0.5,
                prob_given_false: 0.5,
                active_states: &[],
            },
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InputType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "input_type".to_string(),
                message: format!("unknown input type '{s}'"),
            })
    }
}

/// A single continuous sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: Option<String>,
}

/// Hourly rollup of numeric readings, kept after raw samples age out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAggregate {
    pub entity_id: String,
    pub period_start: DateTime<Utc>,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: u32,
}

impl HourlyAggregate {
    /// Point sample at the start of the hour carrying the average.
    pub fn to_sample(&self) -> SensorSample {
        SensorSample {
            entity_id: self.entity_id.clone(),
            timestamp: self.period_start,
            value: self.avg_value,
            unit: None,
        }
    }
}

/// A sensor held `state` over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStateInterval {
    pub entity_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub state: String,
}

impl SensorStateInterval {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start, self.end)
    }
}

//! TOML-based engine configuration.
//!
//! Stores:
//! - Analysis parameters (motion timeout, lookback window, prior weighting, timezone)
//! - Storage retry settings
//! - The areas to learn and the sensors assigned to each
//!
//! Configuration is stored at `~/.config/occupancy/config.toml`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::retry::RetryPolicy;
use crate::error::ConfigError;
use crate::evidence::Entity;
use crate::sensor::InputType;

/// Learning parameters shared by every area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Seconds a motion sensor keeps an area occupied after it turns off.
    #[serde(default = "default_motion_timeout_secs")]
    pub motion_timeout_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_cache_max_age_hours")]
    pub cache_max_age_hours: i64,
    #[serde(default = "default_time_prior_weight")]
    pub time_prior_weight: f64,
    #[serde(default)]
    pub min_prior_override: f64,
    /// IANA zone used for time-of-week priors and monthly correlation buckets.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
}

/// A binary (non-motion) sensor assigned to an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinarySensorConfig {
    pub entity_id: String,
    pub input_type: InputType,
    /// Overrides the input type's default active states.
    #[serde(default)]
    pub active_states: Option<Vec<String>>,
}

impl BinarySensorConfig {
    pub fn active_states(&self) -> Vec<String> {
        match &self.active_states {
            Some(states) => states.clone(),
            None => self
                .input_type
                .defaults()
                .active_states
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// A continuous sensor assigned to an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSensorConfig {
    pub entity_id: String,
    pub input_type: InputType,
}

/// One area and the sensors learned for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    pub name: String,
    /// Motion sensors that define ground-truth occupancy.
    #[serde(default)]
    pub motion_sensors: Vec<String>,
    #[serde(default)]
    pub binary_sensors: Vec<BinarySensorConfig>,
    #[serde(default)]
    pub numeric_sensors: Vec<NumericSensorConfig>,
    /// Overrides the motion type's `P(active | occupied)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_prob_given_true: Option<f64>,
    /// Overrides the motion type's `P(active | unoccupied)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_prob_given_false: Option<f64>,
}

impl AreaConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            motion_sensors: Vec::new(),
            binary_sensors: Vec::new(),
            numeric_sensors: Vec::new(),
            motion_prob_given_true: None,
            motion_prob_given_false: None,
        }
    }

    /// Evidence entity for a sensor of this area, with the configured motion
    /// pair applied to motion sensors.
    pub fn entity(&self, entity_id: &str) -> Option<Entity> {
        let input_type = self.input_type_of(entity_id)?;
        let entity = Entity::new(entity_id, input_type);
        if !input_type.is_motion() {
            return Some(entity);
        }
        let prob_given_true = self.motion_prob_given_true.unwrap_or(entity.prob_given_true);
        let prob_given_false = self.motion_prob_given_false.unwrap_or(entity.prob_given_false);
        Some(entity.with_configured(prob_given_true, prob_given_false))
    }

    /// Input type of a sensor configured in this area.
    pub fn input_type_of(&self, entity_id: &str) -> Option<InputType> {
        if self.motion_sensors.iter().any(|m| m == entity_id) {
            return Some(InputType::Motion);
        }
        self.binary_sensors
            .iter()
            .find(|s| s.entity_id == entity_id)
            .map(|s| s.input_type)
            .or_else(|| {
                self.numeric_sensors
                    .iter()
                    .find(|s| s.entity_id == entity_id)
                    .map(|s| s.input_type)
            })
    }
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/occupancy/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub areas: Vec<AreaConfig>,
}

fn default_motion_timeout_secs() -> u64 {
    300
}
fn default_lookback_days() -> i64 {
    90
}
fn default_cache_max_age_hours() -> i64 {
    24
}
fn default_time_prior_weight() -> f64 {
    crate::prior::DEFAULT_TIME_PRIOR_WEIGHT
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_initial_delay_ms() -> u64 {
    50
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            motion_timeout_secs: default_motion_timeout_secs(),
            lookback_days: default_lookback_days(),
            cache_max_age_hours: default_cache_max_age_hours(),
            time_prior_weight: default_time_prior_weight(),
            min_prior_override: 0.0,
            timezone: default_timezone(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_delay: StdDuration::from_millis(self.retry_initial_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            storage: StorageConfig::default(),
            areas: Vec::new(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config location inside the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("config.toml"),
                message: e.to_string(),
            })
    }

    /// Load from the default location, writing defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key and re-validate. Does not persist.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };

        if !(0.0..=1.0).contains(&self.analysis.time_prior_weight) {
            return Err(invalid("analysis.time_prior_weight", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.analysis.min_prior_override) {
            return Err(invalid("analysis.min_prior_override", "must be within [0, 1]"));
        }
        if self.analysis.lookback_days <= 0 {
            return Err(invalid("analysis.lookback_days", "must be positive"));
        }
        if self.analysis.cache_max_age_hours <= 0 {
            return Err(invalid("analysis.cache_max_age_hours", "must be positive"));
        }
        self.timezone()?;

        let mut seen = HashSet::new();
        for area in &self.areas {
            if area.name.trim().is_empty() {
                return Err(invalid("areas.name", "must not be empty"));
            }
            if !seen.insert(area.name.as_str()) {
                return Err(invalid("areas.name", &format!("duplicate area '{}'", area.name)));
            }
            for (key, prob) in [
                ("areas.motion_prob_given_true", area.motion_prob_given_true),
                ("areas.motion_prob_given_false", area.motion_prob_given_false),
            ] {
                if prob.is_some_and(|p| !(0.0..=1.0).contains(&p)) {
                    return Err(invalid(key, "must be within [0, 1]"));
                }
            }
        }
        Ok(())
    }

    /// The configured analysis timezone.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.analysis
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "analysis.timezone".to_string(),
                message: e.to_string(),
            })
    }

    pub fn motion_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.analysis.motion_timeout_secs as i64)
    }

    pub fn area(&self, name: &str) -> Result<&AreaConfig, ConfigError> {
        self.areas
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| ConfigError::UnknownArea(name.to_string()))
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

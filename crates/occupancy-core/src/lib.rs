//! # Occupancy Core Library
//!
//! Learns occupancy evidence from sensor history. Everything the CLI does is
//! available from this crate; the binary is a thin layer over it.
//!
//! ## Architecture
//!
//! - **Intervals**: merge, clip and timeout-extend motion spans
//! - **Occupied cache**: ground-truth occupied intervals per area, rebuilt
//!   from motion history when stale
//! - **Priors**: a global occupancy ratio plus a DST-aware time-of-week table
//! - **Correlation**: Pearson analysis for continuous sensors and
//!   duration-weighted likelihoods for binary ones, with monthly retention
//! - **Evidence**: per-entity `P(state | occupied)` / `P(state | unoccupied)`
//!   from whatever was learned last
//! - **Storage**: the [`Repository`] contract, its SQLite implementation and
//!   TOML configuration
//!
//! ## Key Components
//!
//! - [`OccupiedIntervalBuilder`]: motion history to occupied intervals
//! - [`Prior`]: area prior with time-of-week adjustment
//! - [`Entity`]: likelihood lookup at evaluation time
//! - [`LearningScheduler`]: runs learning cycles, one per area at a time
//! - [`Database`]: SQLite persistence
//! - [`Config`]: application configuration

pub mod correlation;
pub mod error;
pub mod evidence;
pub mod history;
pub mod intervals;
pub mod occupied;
pub mod prior;
pub mod scheduler;
pub mod sensor;
pub mod storage;

pub use correlation::{AnalysisError, BinaryLikelihoodResult, CorrelationResult, CorrelationType, LearnedBinaryLikelihood};
pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use evidence::{Entity, LearnedGaussianParams, Likelihood};
pub use intervals::TimeInterval;
pub use occupied::OccupiedIntervalBuilder;
pub use prior::{GlobalPrior, Prior, TimePriorSlot};
pub use scheduler::{CycleReport, LearningScheduler};
pub use sensor::{HourlyAggregate, InputType, SensorSample, SensorStateInterval};
pub use storage::{AreaConfig, Config, Database, Repository};

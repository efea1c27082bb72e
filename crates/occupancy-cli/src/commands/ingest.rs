use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use occupancy_core::correlation::RETENTION_RAW_NUMERIC_SAMPLES_DAYS;
use occupancy_core::history::{states_to_intervals, states_to_numeric_samples, IntervalLimits, StateChange};
use occupancy_core::{Config, HourlyAggregate, InputType, SensorSample, SensorStateInterval};

use super::open_database;

#[derive(Subcommand)]
pub enum IngestAction {
    /// Record one state interval
    State {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        state: String,
        /// RFC 3339 start time
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end time
        #[arg(long)]
        end: DateTime<Utc>,
    },
    /// Record one numeric reading
    Sample {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
        /// Reading time (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        unit: Option<String>,
    },
    /// Record one hourly aggregate
    Aggregate {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
        /// Start of the hour
        #[arg(long)]
        hour: DateTime<Utc>,
        #[arg(long, allow_negative_numbers = true)]
        avg: f64,
        #[arg(long, allow_negative_numbers = true)]
        min: f64,
        #[arg(long, allow_negative_numbers = true)]
        max: f64,
        #[arg(long)]
        count: u32,
    },
    /// Import recorder state changes from a JSON array
    History {
        #[arg(long)]
        area: String,
        /// Input type of every entity in the file (e.g. "motion", "co2")
        #[arg(long)]
        input_type: InputType,
        #[arg(long)]
        unit: Option<String>,
        /// JSON file of `{entity_id, state, last_changed}` objects
        file: PathBuf,
    },
    /// Roll old raw samples into hourly aggregates
    Compact {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
        #[arg(long, default_value_t = RETENTION_RAW_NUMERIC_SAMPLES_DAYS)]
        older_than_days: i64,
    },
}

pub fn run(action: IngestAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_database(&config)?;

    match action {
        IngestAction::State {
            area,
            entity,
            state,
            start,
            end,
        } => {
            db.insert_state_interval(
                &area,
                &SensorStateInterval {
                    entity_id: entity,
                    start,
                    end,
                    state,
                },
            )?;
            println!("ok");
        }
        IngestAction::Sample {
            area,
            entity,
            value,
            at,
            unit,
        } => {
            db.insert_numeric_sample(
                &area,
                &SensorSample {
                    entity_id: entity,
                    timestamp: at.unwrap_or_else(Utc::now),
                    value,
                    unit,
                },
            )?;
            println!("ok");
        }
        IngestAction::Aggregate {
            area,
            entity,
            hour,
            avg,
            min,
            max,
            count,
        } => {
            db.insert_hourly_aggregate(
                &area,
                &HourlyAggregate {
                    entity_id: entity,
                    period_start: hour,
                    avg_value: avg,
                    min_value: min,
                    max_value: max,
                    sample_count: count,
                },
            )?;
            println!("ok");
        }
        IngestAction::History {
            area,
            input_type,
            unit,
            file,
        } => {
            let content = std::fs::read_to_string(&file)?;
            let changes: Vec<StateChange> = serde_json::from_str(&content)?;

            let imported = if input_type.is_numeric() {
                let samples = states_to_numeric_samples(&changes, input_type, unit.as_deref());
                for sample in &samples {
                    db.insert_numeric_sample(&area, sample)?;
                }
                samples.len()
            } else {
                let now = Utc::now();
                let intervals = states_to_intervals(&changes, now, now, IntervalLimits::default());
                for interval in &intervals {
                    db.insert_state_interval(&area, interval)?;
                }
                intervals.len()
            };
            println!("imported {imported} of {} changes", changes.len());
        }
        IngestAction::Compact {
            area,
            entity,
            older_than_days,
        } => {
            let cutoff = Utc::now() - Duration::days(older_than_days);
            let removed = db.compact_numeric_samples(&area, &entity, cutoff)?;
            println!("compacted {removed} samples");
        }
    }
    Ok(())
}

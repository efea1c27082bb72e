use chrono::{DateTime, Utc};
use clap::Subcommand;
use occupancy_core::intervals::total_occupied_seconds;
use occupancy_core::{Config, OccupiedIntervalBuilder, Repository};

use super::open_database;

#[derive(Subcommand)]
pub enum OccupiedAction {
    /// Rebuild the cache from motion history
    Rebuild {
        #[arg(long)]
        area: String,
    },
    /// Print cached occupied intervals
    Show {
        #[arg(long)]
        area: String,
        /// Only intervals overlapping this time or later
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

pub fn run(action: OccupiedAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_database(&config)?;

    match action {
        OccupiedAction::Rebuild { area } => {
            let area = config.area(&area)?;
            let builder = OccupiedIntervalBuilder::from_config(&config.analysis);
            let written = builder.rebuild_occupied_cache(&db, &area.name, &area.motion_sensors, Utc::now())?;
            println!("rebuilt {written} intervals for {}", area.name);
        }
        OccupiedAction::Show { area, since } => {
            let intervals = db.get_occupied_intervals(&area, since, None)?;
            let out = serde_json::json!({
                "area": area,
                "calculated_at": db.occupied_cache_calculated_at(&area)?,
                "total_occupied_seconds": total_occupied_seconds(&intervals),
                "intervals": intervals,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

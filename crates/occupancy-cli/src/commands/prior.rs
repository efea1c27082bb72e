use chrono::Utc;
use clap::Subcommand;
use occupancy_core::{Config, Prior, Repository};

use super::open_database;

#[derive(Subcommand)]
pub enum PriorAction {
    /// Stored global prior and the effective prior right now
    Show {
        #[arg(long)]
        area: String,
    },
    /// Time-of-week prior slots
    Slots {
        #[arg(long)]
        area: String,
    },
}

pub fn run(action: PriorAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_database(&config)?;

    match action {
        PriorAction::Show { area } => {
            let tz = config.timezone()?;
            let now = Utc::now();
            let mut prior = Prior::new(area.as_str())
                .with_time_weight(config.analysis.time_prior_weight)
                .with_min_prior_override(config.analysis.min_prior_override);
            prior.load_global_prior(&db);
            prior.load_time_priors(&db);

            let out = serde_json::json!({
                "area": area,
                "global": db.get_global_prior(&area)?,
                "time_prior": prior.time_prior(now, &tz),
                "prior": prior.value(now, &tz),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        PriorAction::Slots { area } => {
            let slots = db.get_time_priors(&area)?;
            println!("{}", serde_json::to_string_pretty(&slots)?);
        }
    }
    Ok(())
}

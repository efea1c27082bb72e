use chrono::Utc;
use clap::Subcommand;
use occupancy_core::correlation::get_correlation_for_entity;
use occupancy_core::{Config, ConfigError, Repository};

use super::open_database;

#[derive(Subcommand)]
pub enum CorrelationAction {
    /// Current correlation result for a sensor
    Show {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
    },
    /// Every stored result for a sensor, one per month
    History {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
    },
    /// Likelihoods of a sensor state under what was learned
    Likelihood {
        #[arg(long)]
        area: String,
        #[arg(long)]
        entity: String,
        /// Current state or reading
        #[arg(long, allow_negative_numbers = true)]
        state: Option<String>,
    },
}

pub fn run(action: CorrelationAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_database(&config)?;
    let tz = config.timezone()?;

    match action {
        CorrelationAction::Show { area, entity } => {
            let result = get_correlation_for_entity(&db, &area, &entity, Utc::now(), &tz)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        CorrelationAction::History { area, entity } => {
            let rows = db.list_correlations(&area, &entity)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        CorrelationAction::Likelihood { area, entity, state } => {
            let mut evidence = config
                .area(&area)?
                .entity(&entity)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: entity.clone(),
                    message: format!("not a sensor of area '{area}'"),
                })?;
            let learned = evidence.refresh(&db, &area, Utc::now(), &tz)?;
            let (prob_given_true, prob_given_false) = evidence.get_likelihoods(state.as_deref());

            let out = serde_json::json!({
                "entity": evidence,
                "learned": learned,
                "state": state,
                "prob_given_true": prob_given_true,
                "prob_given_false": prob_given_false,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use occupancy_core::scheduler::cycle_due;
use occupancy_core::{AreaConfig, Config, CycleReport, Database, LearningScheduler};
use tracing::{info, warn};

use super::open_database;

#[derive(Subcommand)]
pub enum LearnAction {
    /// Run one learning cycle
    Run {
        /// Only this area (default: every configured area)
        #[arg(long)]
        area: Option<String>,
    },
    /// Run learning cycles periodically
    Watch {
        #[arg(long)]
        area: Option<String>,
        #[arg(long, default_value_t = 60)]
        every_mins: u64,
        /// Stop after this many ticks
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Show when each area last finished a cycle
    Status,
}

fn last_cycle_key(area_name: &str) -> String {
    format!("last_learning_cycle:{area_name}")
}

fn selected_areas<'a>(config: &'a Config, area: Option<&str>) -> Result<Vec<&'a AreaConfig>, Box<dyn std::error::Error>> {
    match area {
        Some(name) => Ok(vec![config.area(name)?]),
        None if config.areas.is_empty() => Err("no areas configured".into()),
        None => Ok(config.areas.iter().collect()),
    }
}

fn last_run(db: &Database, area_name: &str) -> Result<Option<DateTime<Utc>>, Box<dyn std::error::Error>> {
    let Some(raw) = db.kv_get(&last_cycle_key(area_name))? else {
        return Ok(None);
    };
    Ok(Some(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc)))
}

fn run_area(
    config: &Config,
    db: &Database,
    scheduler: &LearningScheduler,
    area: &AreaConfig,
) -> Result<CycleReport, Box<dyn std::error::Error>> {
    let tz = config.timezone()?;
    let report = scheduler.run_cycle(db, area, &config.analysis, Utc::now(), &tz)?;
    db.kv_set(&last_cycle_key(&area.name), &report.started_at.to_rfc3339())?;
    Ok(report)
}

pub fn run(action: LearnAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = open_database(&config)?;
    let scheduler = LearningScheduler::new();

    match action {
        LearnAction::Run { area } => {
            let mut reports = Vec::new();
            for area in selected_areas(&config, area.as_deref())? {
                reports.push(run_area(&config, &db, &scheduler, area)?);
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        LearnAction::Watch {
            area,
            every_mins,
            max_cycles,
        } => {
            let areas = selected_areas(&config, area.as_deref())?;
            let every = Duration::minutes(every_mins as i64);
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;

            runtime.block_on(async {
                let mut ticker = tokio::time::interval(StdDuration::from_secs(every_mins.max(1) * 60));
                let mut ticks = 0u64;
                loop {
                    ticker.tick().await;
                    for area in &areas {
                        if !cycle_due(last_run(&db, &area.name)?, every, Utc::now()) {
                            info!(area = %area.name, "cycle not due yet, skipping");
                            continue;
                        }
                        match run_area(&config, &db, &scheduler, area) {
                            Ok(report) => println!("{}", serde_json::to_string(&report)?),
                            Err(e) => warn!(area = %area.name, error = %e, "learning cycle failed"),
                        }
                    }
                    ticks += 1;
                    if max_cycles.is_some_and(|max| ticks >= max) {
                        break;
                    }
                }
                Ok::<(), Box<dyn std::error::Error>>(())
            })?;
        }
        LearnAction::Status => {
            let mut status = BTreeMap::new();
            for area in &config.areas {
                status.insert(area.name.clone(), last_run(&db, &area.name)?);
            }
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

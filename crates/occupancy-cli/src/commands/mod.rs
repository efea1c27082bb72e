pub mod config;
pub mod correlation;
pub mod ingest;
pub mod learn;
pub mod occupied;
pub mod prior;

use occupancy_core::{Config, Database};

/// Open the database with the retry policy from `config`.
pub(crate) fn open_database(config: &Config) -> Result<Database, Box<dyn std::error::Error>> {
    Ok(Database::open()?.with_retry_policy(config.storage.retry_policy()))
}

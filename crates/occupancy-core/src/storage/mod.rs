mod config;
pub mod database;
pub mod migrations;
pub mod repository;
pub mod retry;

pub use config::{
    AnalysisConfig, AreaConfig, BinarySensorConfig, Config, NumericSensorConfig, StorageConfig,
};
pub use database::Database;
pub use repository::Repository;
pub use retry::{with_retry, RetryPolicy};

use std::path::PathBuf;

/// Returns `~/.config/occupancy[-dev]/` based on OCCUPANCY_ENV.
///
/// Set OCCUPANCY_ENV=dev to use the development data directory, or
/// OCCUPANCY_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("OCCUPANCY_DATA_DIR") {
        Some(custom) => PathBuf::from(custom),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("OCCUPANCY_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("occupancy-dev")
            } else {
                base_dir.join("occupancy")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

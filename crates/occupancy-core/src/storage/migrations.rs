//! Database schema migrations for occupancy storage.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{debug, warn};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| row.get::<_, i32>(0))
        .unwrap_or_else(|e| {
            if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                warn!(error = %e, "failed to read schema_version");
            }
            0
        })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    debug!(version, "schema version updated");
    Ok(())
}

/// Migration v1: occupied cache, sensor history, priors, correlations and kv.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS occupied_intervals_cache (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            area_name        TEXT NOT NULL,
            start_time       TEXT NOT NULL,
            end_time         TEXT NOT NULL,
            duration_seconds REAL NOT NULL,
            calculation_date TEXT NOT NULL,
            data_source      TEXT NOT NULL DEFAULT 'merged',
            UNIQUE(area_name, start_time, end_time)
        );

        CREATE TABLE IF NOT EXISTS state_intervals (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            area_name  TEXT NOT NULL,
            entity_id  TEXT NOT NULL,
            state      TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time   TEXT NOT NULL,
            UNIQUE(entity_id, start_time)
        );

        CREATE TABLE IF NOT EXISTS numeric_samples (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            area_name TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            value     REAL NOT NULL,
            unit      TEXT,
            UNIQUE(entity_id, timestamp)
        );

        CREATE TABLE IF NOT EXISTS global_priors (
            area_name              TEXT PRIMARY KEY,
            prior_value            REAL NOT NULL,
            data_period_start      TEXT NOT NULL,
            data_period_end        TEXT NOT NULL,
            total_occupied_seconds REAL NOT NULL,
            total_period_seconds   REAL NOT NULL,
            interval_count         INTEGER NOT NULL,
            data_hash              TEXT NOT NULL,
            calculation_date       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS time_priors (
            area_name    TEXT NOT NULL,
            day_of_week  INTEGER NOT NULL,
            time_slot    INTEGER NOT NULL,
            prior_value  REAL NOT NULL,
            data_points  INTEGER NOT NULL,
            period_start TEXT NOT NULL,
            period_end   TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (area_name, day_of_week, time_slot)
        );

        CREATE TABLE IF NOT EXISTS correlations (
            id                         INTEGER PRIMARY KEY AUTOINCREMENT,
            area_name                  TEXT NOT NULL,
            entity_id                  TEXT NOT NULL,
            input_type                 TEXT NOT NULL,
            correlation_coefficient    REAL NOT NULL,
            p_value                    REAL NOT NULL,
            correlation_type           TEXT NOT NULL,
            confidence                 REAL NOT NULL,
            sample_count               INTEGER NOT NULL,
            mean_value_when_occupied   REAL,
            mean_value_when_unoccupied REAL,
            std_dev_when_occupied      REAL,
            std_dev_when_unoccupied    REAL,
            threshold_active           REAL,
            threshold_inactive         REAL,
            analysis_period_start      TEXT NOT NULL,
            analysis_period_end        TEXT NOT NULL,
            calculation_date           TEXT NOT NULL,
            analysis_error             TEXT,
            UNIQUE(area_name, entity_id, analysis_period_start)
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_occupied_area_start ON occupied_intervals_cache(area_name, start_time);
        CREATE INDEX IF NOT EXISTS idx_state_entity_start ON state_intervals(area_name, entity_id, start_time);
        CREATE INDEX IF NOT EXISTS idx_numeric_entity_ts ON numeric_samples(area_name, entity_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_correlations_area_entity ON correlations(area_name, entity_id);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: hourly rollups of numeric samples.
///
/// Raw samples older than the retention window are only available through
/// this table.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS numeric_aggregates_hourly (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            area_name    TEXT NOT NULL,
            entity_id    TEXT NOT NULL,
            period_start TEXT NOT NULL,
            avg_value    REAL NOT NULL,
            min_value    REAL NOT NULL,
            max_value    REAL NOT NULL,
            sample_count INTEGER NOT NULL,
            UNIQUE(entity_id, period_start)
        );

        CREATE INDEX IF NOT EXISTS idx_aggregates_entity_period
            ON numeric_aggregates_hourly(area_name, entity_id, period_start);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

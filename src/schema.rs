//! Database schema and migrations.

use log::info;
use rusqlite::{params, Connection, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 2;

/// Create all tables and indexes, then bring older layouts up to date.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Track metadata (point count and bounding box are store-maintained)
        CREATE TABLE IF NOT EXISTS tracks (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            num_points INTEGER NOT NULL DEFAULT 0,
            north_e6 INTEGER,
            south_e6 INTEGER,
            east_e6 INTEGER,
            west_e6 INTEGER,
            stats BLOB
        );

        -- Samples; id order is the sequence order within a track
        CREATE TABLE IF NOT EXISTS trackpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL,
            latitude_e6 INTEGER,
            longitude_e6 INTEGER,
            time INTEGER NOT NULL,
            altitude REAL,
            accuracy REAL,
            speed REAL,
            sensor BLOB
        );

        -- Markers; track_id is a plain reference, orphans are allowed
        CREATE TABLE IF NOT EXISTS waypoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            icon_url TEXT NOT NULL DEFAULT '',
            waypoint_type INTEGER NOT NULL DEFAULT 0,
            latitude_e6 INTEGER,
            longitude_e6 INTEGER,
            altitude REAL,
            accuracy REAL,
            time INTEGER,
            stats BLOB
        );

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_trackpoints_track ON trackpoints(track_id, id);
        CREATE INDEX IF NOT EXISTS idx_waypoints_track_type ON waypoints(track_id, waypoint_type, id);
        "#,
    )?;

    migrate_add_sensor_column(conn)?;
    record_version(conn)?;
    Ok(())
}

/// Read the highest applied schema version (0 for a fresh database).
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn record_version(conn: &Connection) -> Result<()> {
    if schema_version(conn)? < SCHEMA_VERSION {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;
        info!("[TrackStore] Schema at version {}", SCHEMA_VERSION);
    }
    Ok(())
}

/// Migration: add the sensor payload column to trackpoints.
/// Version 1 databases stored no sensor data.
pub fn migrate_add_sensor_column(conn: &Connection) -> Result<()> {
    if !needs_sensor_column_migration(conn)? {
        return Ok(());
    }

    info!("Running migration: add_sensor_column");
    conn.execute("ALTER TABLE trackpoints ADD COLUMN sensor BLOB", [])?;
    info!("Migration add_sensor_column completed successfully");
    Ok(())
}

/// Check if the sensor column migration is needed.
pub fn needs_sensor_column_migration(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info('trackpoints') WHERE name = 'sensor'")?
        .query_row([], |row| row.get(0))?;

    Ok(count == 0)
}

//! # Track Aggregate Manager
//!
//! Track metadata and the operations that span tables.
//!
//! `num_points` and the bounding box columns are owned by the store: they are
//! updated in the same transaction as every point insert and delete, and
//! `insert_track` / `update_track` never take them from the caller.

use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{decode_stats, encode_stats, TrackDb};
use crate::error::{OptionExt, Result};
use crate::types::{BoundingBoxE6, Track};

const TRACK_COLUMNS: &str =
    "id, name, description, category, num_points, north_e6, south_e6, east_e6, west_e6, stats";

const BOUNDS_COLUMNS: &str = "north_e6, south_e6, east_e6, west_e6";

/// Read the four bounding box columns starting at `first`.
fn bounds_from_row(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<BoundingBoxE6>> {
    let north: Option<i32> = row.get(first)?;
    let south: Option<i32> = row.get(first + 1)?;
    let east: Option<i32> = row.get(first + 2)?;
    let west: Option<i32> = row.get(first + 3)?;
    Ok(match (north, south, east, west) {
        (Some(north), Some(south), Some(east), Some(west)) => Some(BoundingBoxE6 {
            north,
            south,
            east,
            west,
        }),
        _ => None,
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        number_of_points: row.get(4)?,
        bounding_box: bounds_from_row(row, 5)?,
        statistics: decode_stats(row.get(9)?, 9)?,
    })
}

// ============================================================================
// Helpers shared with the point store (run inside the caller's transaction)
// ============================================================================

/// Load the stored bounding box of a track, failing if the track is unknown.
///
/// Reads only the bounds columns; the statistics blob is never decoded here.
pub(crate) fn require_track(conn: &Connection, track_id: i64) -> Result<Option<BoundingBoxE6>> {
    let bounds = conn
        .query_row(
            &format!("SELECT {} FROM tracks WHERE id = ?", BOUNDS_COLUMNS),
            params![track_id],
            |row| bounds_from_row(row, 0),
        )
        .optional()?
        .ok_or_unknown_track(track_id)?;
    Ok(bounds)
}

/// Bump the cached point count and store the grown bounding box.
pub(crate) fn record_appended(
    conn: &Connection,
    track_id: i64,
    added: i64,
    bounds: Option<BoundingBoxE6>,
) -> Result<()> {
    let (north, south, east, west) = match bounds {
        Some(b) => (Some(b.north), Some(b.south), Some(b.east), Some(b.west)),
        None => (None, None, None, None),
    };
    conn.execute(
        "UPDATE tracks SET num_points = num_points + ?, north_e6 = ?, south_e6 = ?,
         east_e6 = ?, west_e6 = ? WHERE id = ?",
        params![added, north, south, east, west, track_id],
    )?;
    Ok(())
}

/// Zero the point count and bounding box of one track, or of every track.
pub(crate) fn reset_points(conn: &Connection, track_id: Option<i64>) -> Result<()> {
    const RESET: &str = "UPDATE tracks SET num_points = 0, north_e6 = NULL, south_e6 = NULL,
                         east_e6 = NULL, west_e6 = NULL";
    match track_id {
        Some(id) => conn.execute(&format!("{} WHERE id = ?", RESET), params![id])?,
        None => conn.execute(RESET, [])?,
    };
    Ok(())
}

impl TrackDb {
    // ========================================================================
    // Track CRUD
    // ========================================================================

    /// Insert a track under its externally assigned id.
    ///
    /// The new track always starts with zero points and no bounding box.
    /// Inserting an id that already exists fails with a storage error.
    pub fn insert_track(&self, track: &Track) -> Result<()> {
        let stats = encode_stats(track.statistics.as_ref())?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tracks (id, name, description, category, num_points, stats)
             VALUES (?, ?, ?, ?, 0, ?)",
            params![
                track.id,
                track.name,
                track.description,
                track.category,
                stats
            ],
        )?;
        Ok(())
    }

    /// Get a track by id.
    pub fn get_track(&self, track_id: i64) -> Result<Option<Track>> {
        let conn = self.lock()?;
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE id = ?", TRACK_COLUMNS),
                params![track_id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// All tracks, ordered by id.
    pub fn get_all_tracks(&self) -> Result<Vec<Track>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tracks ORDER BY id", TRACK_COLUMNS))?;
        let tracks = stmt
            .query_map([], track_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    /// The track with the highest id.
    pub fn get_last_track(&self) -> Result<Option<Track>> {
        let conn = self.lock()?;
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks ORDER BY id DESC LIMIT 1",
                    TRACK_COLUMNS
                ),
                [],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// Update the descriptive fields of a track.
    ///
    /// Returns `false` if no track has that id.
    pub fn update_track(&self, track: &Track) -> Result<bool> {
        let stats = encode_stats(track.statistics.as_ref())?;
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE tracks SET name = ?, description = ?, category = ?, stats = ? WHERE id = ?",
            params![
                track.name,
                track.description,
                track.category,
                stats,
                track.id
            ],
        )?;
        Ok(updated > 0)
    }

    // ========================================================================
    // Cascading deletes
    // ========================================================================

    /// Delete a track together with all of its points and waypoints.
    ///
    /// Runs as one transaction in the order waypoints, points, track; a
    /// failure rolls everything back and is returned to the caller.
    /// Returns `false` if the track row did not exist.
    pub fn delete_track(&self, track_id: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let waypoints = tx.execute("DELETE FROM waypoints WHERE track_id = ?", params![track_id])?;
        let points = tx.execute("DELETE FROM trackpoints WHERE track_id = ?", params![track_id])?;
        let tracks = tx.execute("DELETE FROM tracks WHERE id = ?", params![track_id])?;
        tx.commit()?;

        info!(
            "[TrackStore] Deleted track {} ({} points, {} waypoints)",
            track_id, points, waypoints
        );
        Ok(tracks > 0)
    }

    /// Delete every track, point and waypoint.
    pub fn delete_all_tracks(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM waypoints;
             DELETE FROM trackpoints;
             DELETE FROM tracks;",
        )?;
        tx.commit()?;

        info!("[TrackStore] Deleted all tracks");
        Ok(())
    }
}

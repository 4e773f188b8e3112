//! # Track Point Store
//!
//! Durable, id-ordered storage of track points.
//!
//! Point ids come from SQLite `AUTOINCREMENT`, so they are unique across the
//! whole store, strictly increasing in insertion order and never reused. Within
//! a track, id order is the sequence order; there is no separate sequence
//! column.
//!
//! Every mutation updates the owning track's cached `num_points` and bounding
//! box in the same transaction (see [`crate::tracks`]).

use log::{debug, warn};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::db::TrackDb;
use crate::error::{Result, TrackStoreError};
use crate::tracks;
use crate::types::{BoundingBoxE6, Position, TrackPoint};

const POINT_COLUMNS: &str =
    "id, track_id, latitude_e6, longitude_e6, time, altitude, accuracy, speed, sensor";

const INSERT_POINT: &str = "INSERT INTO trackpoints
    (track_id, latitude_e6, longitude_e6, time, altitude, accuracy, speed, sensor)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

pub(crate) fn point_from_row(row: &Row<'_>) -> rusqlite::Result<TrackPoint> {
    let accuracy: Option<f64> = row.get(6)?;
    let speed: Option<f64> = row.get(7)?;
    Ok(TrackPoint {
        id: row.get(0)?,
        track_id: row.get(1)?,
        position: Position::from_columns(row.get(2)?, row.get(3)?),
        time: row.get(4)?,
        altitude: row.get(5)?,
        accuracy: accuracy.map(|a| a as f32),
        speed: speed.map(|s| s as f32),
        sensor: row.get(8)?,
    })
}

fn insert_point_row(conn: &Connection, point: &TrackPoint, track_id: i64) -> Result<i64> {
    point.position.validate()?;
    let (latitude_e6, longitude_e6) = point.position.to_columns();
    let mut stmt = conn.prepare_cached(INSERT_POINT)?;
    stmt.execute(params![
        track_id,
        latitude_e6,
        longitude_e6,
        point.time,
        point.altitude,
        point.accuracy.map(f64::from),
        point.speed.map(f64::from),
        point.sensor,
    ])?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// Range queries
// ============================================================================

/// One id-window query over a track's points.
///
/// Bounds are inclusive; `None` leaves that side unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointQuery {
    pub track_id: i64,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub limit: usize,
    pub descending: bool,
}

impl PointQuery {
    /// Ascending, unbounded query returning at most `limit` points.
    pub fn new(track_id: i64, limit: usize) -> Self {
        Self {
            track_id,
            min_id: None,
            max_id: None,
            limit,
            descending: false,
        }
    }

    pub fn min_id(mut self, min_id: i64) -> Self {
        self.min_id = Some(min_id);
        self
    }

    pub fn max_id(mut self, max_id: i64) -> Self {
        self.max_id = Some(max_id);
        self
    }

    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    /// Reject empty windows and zero limits.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(TrackStoreError::InvalidArgument(
                "point query limit must be at least 1".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_id, self.max_id) {
            if min > max {
                return Err(TrackStoreError::InvalidArgument(format!(
                    "point id range is empty: min {} > max {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

/// Run a range query on an open connection.
pub(crate) fn query_point_range(conn: &Connection, query: &PointQuery) -> Result<Vec<TrackPoint>> {
    query.validate()?;

    // Only bounded sides become SQL predicates so the (track_id, id) index
    // serves the range directly.
    let mut sql = format!(
        "SELECT {} FROM trackpoints WHERE track_id = ?",
        POINT_COLUMNS
    );
    let mut values: Vec<i64> = vec![query.track_id];
    if let Some(min_id) = query.min_id {
        sql.push_str(" AND id >= ?");
        values.push(min_id);
    }
    if let Some(max_id) = query.max_id {
        sql.push_str(" AND id <= ?");
        values.push(max_id);
    }
    sql.push_str(if query.descending {
        " ORDER BY id DESC LIMIT ?"
    } else {
        " ORDER BY id ASC LIMIT ?"
    });
    values.push(i64::try_from(query.limit).unwrap_or(i64::MAX));

    let mut stmt = conn.prepare_cached(&sql)?;
    let points = stmt
        .query_map(params_from_iter(values), point_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(points)
}

impl TrackDb {
    // ========================================================================
    // Inserts
    // ========================================================================

    /// Append one point to a track and return its id.
    ///
    /// Fails with `InvalidArgument` if the track does not exist or the point
    /// is a fix outside ±90/±180 degrees.
    pub fn insert_point(&self, point: &TrackPoint, track_id: i64) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let bounds = match tracks::require_track(&tx, track_id) {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!("[TrackStore] Rejected point insert: {}", e);
                return Err(e);
            }
        };
        let id = insert_point_row(&tx, point, track_id)?;
        tracks::record_appended(&tx, track_id, 1, BoundingBoxE6::include(bounds, point.position))?;
        tx.commit()?;
        Ok(id)
    }

    /// Append many points to a track in one transaction.
    ///
    /// `count_hint` of `None` inserts the whole slice. `Some(n)` inserts only
    /// the first `n` points (or all of them if the slice is shorter) and
    /// silently ignores the rest, so a fixed-size buffer can be flushed
    /// partially. Either every point is stored and the track count grows by
    /// the returned number, or nothing changes.
    pub fn bulk_insert_points(
        &self,
        points: &[TrackPoint],
        count_hint: Option<usize>,
        track_id: i64,
    ) -> Result<usize> {
        let count = count_hint.map_or(points.len(), |n| n.min(points.len()));
        let points = &points[..count];

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let bounds = match tracks::require_track(&tx, track_id) {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!(
                    "[TrackStore] Rejected bulk insert of {} points: {}",
                    count, e
                );
                return Err(e);
            }
        };

        let mut grown = bounds;
        for point in points {
            insert_point_row(&tx, point, track_id)?;
            grown = BoundingBoxE6::include(grown, point.position);
        }
        tracks::record_appended(&tx, track_id, count as i64, grown)?;
        tx.commit()?;

        debug!(
            "[TrackStore] Bulk inserted {} points into track {}",
            count, track_id
        );
        Ok(count)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// At most `query.limit` points of a track inside the id window, in id
    /// order.
    pub fn get_point_range(&self, query: &PointQuery) -> Result<Vec<TrackPoint>> {
        let conn = self.lock()?;
        query_point_range(&conn, query)
    }

    /// Up to `limit` points starting at `start_id` (inclusive) in the given
    /// direction; `None` starts at the first (or, descending, the last) point.
    pub fn track_points(
        &self,
        track_id: i64,
        start_id: Option<i64>,
        limit: usize,
        descending: bool,
    ) -> Result<Vec<TrackPoint>> {
        let mut query = PointQuery::new(track_id, limit).descending(descending);
        if let Some(start) = start_id {
            query = if descending {
                query.max_id(start)
            } else {
                query.min_id(start)
            };
        }
        self.get_point_range(&query)
    }

    /// Id of the first point of a track.
    pub fn first_point_id(&self, track_id: i64) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM trackpoints WHERE track_id = ? ORDER BY id ASC LIMIT 1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Id of the last point of a track.
    pub fn last_point_id(&self, track_id: i64) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM trackpoints WHERE track_id = ? ORDER BY id DESC LIMIT 1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// The last point of a track that carries a position fix.
    pub fn last_valid_point(&self, track_id: i64) -> Result<Option<TrackPoint>> {
        let conn = self.lock()?;
        let point = conn
            .query_row(
                &format!(
                    "SELECT {} FROM trackpoints
                     WHERE track_id = ? AND latitude_e6 IS NOT NULL AND longitude_e6 IS NOT NULL
                     ORDER BY id DESC LIMIT 1",
                    POINT_COLUMNS
                ),
                params![track_id],
                point_from_row,
            )
            .optional()?;
        Ok(point)
    }

    /// Number of point rows stored for a track, counted from the table.
    pub fn count_points(&self, track_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM trackpoints WHERE track_id = ?",
            params![track_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of point rows in the whole store.
    pub fn count_all_points(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM trackpoints", [], |row| row.get(0))?;
        Ok(count)
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Remove every point of a track and reset its count and bounding box.
    pub fn delete_all_points_for_track(&self, track_id: i64) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM trackpoints WHERE track_id = ?",
            params![track_id],
        )?;
        tracks::reset_points(&tx, Some(track_id))?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Remove every point in the store and reset all track counts.
    pub fn delete_all_points(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM trackpoints", [])?;
        tracks::reset_points(&tx, None)?;
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Track;

    const INITIAL_LATITUDE: f64 = 37.0;
    const INITIAL_LONGITUDE: f64 = -57.0;

    fn sample_point(i: usize) -> TrackPoint {
        TrackPoint::fix(
            INITIAL_LATITUDE + i as f64 / 10000.0,
            INITIAL_LONGITUDE - i as f64 / 10000.0,
            1_000 * i as i64,
        )
        .with_accuracy(i as f32 / 100.0)
        .with_altitude(i as f64 * 2.5)
    }

    fn sample_points(n: usize) -> Vec<TrackPoint> {
        (0..n).map(sample_point).collect()
    }

    fn db_with_points(track_id: i64, n: usize) -> TrackDb {
        let db = TrackDb::in_memory().unwrap();
        db.insert_track(&Track::new(track_id, "test")).unwrap();
        db.bulk_insert_points(&sample_points(n), None, track_id)
            .unwrap();
        db
    }

    #[test]
    fn test_insert_point_updates_count() {
        let db = db_with_points(1, 10);
        let id = db.insert_point(&sample_point(22), 1).unwrap();
        assert_eq!(id, 11);
        assert_eq!(db.get_track(1).unwrap().unwrap().number_of_points, 11);
        assert_eq!(db.count_points(1).unwrap(), 11);
    }

    #[test]
    fn test_insert_point_unknown_track() {
        let db = TrackDb::in_memory().unwrap();
        let result = db.insert_point(&sample_point(0), 3);
        assert!(matches!(result, Err(TrackStoreError::InvalidArgument(_))));
        assert_eq!(db.count_all_points().unwrap(), 0);
    }

    #[test]
    fn test_bulk_insert_truncates_to_hint() {
        let db = db_with_points(1, 10);
        let points = sample_points(10);

        assert_eq!(db.bulk_insert_points(&points, None, 1).unwrap(), 10);
        assert_eq!(db.count_points(1).unwrap(), 20);

        assert_eq!(db.bulk_insert_points(&points, Some(8), 1).unwrap(), 8);
        assert_eq!(db.count_points(1).unwrap(), 28);
        assert_eq!(db.get_track(1).unwrap().unwrap().number_of_points, 28);

        assert_eq!(db.bulk_insert_points(&points, Some(50), 1).unwrap(), 10);
        assert_eq!(db.bulk_insert_points(&points, Some(0), 1).unwrap(), 0);
        assert_eq!(db.get_track(1).unwrap().unwrap().number_of_points, 38);
    }

    #[test]
    fn test_bulk_insert_unknown_track_inserts_nothing() {
        let db = db_with_points(1, 3);
        let result = db.bulk_insert_points(&sample_points(5), None, 2);
        assert!(matches!(result, Err(TrackStoreError::InvalidArgument(_))));
        assert_eq!(db.count_all_points().unwrap(), 3);
        assert_eq!(db.get_track(1).unwrap().unwrap().number_of_points, 3);
    }

    #[test]
    fn test_bulk_insert_rolls_back_on_storage_failure() {
        let db = db_with_points(1, 1);
        let before = db.get_track(1).unwrap().unwrap();

        // Abort on the fifth point of the batch (time 4000)
        db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER abort_midway BEFORE INSERT ON trackpoints
                 WHEN NEW.time = 4000
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let result = db.bulk_insert_points(&sample_points(10), None, 1);
        assert!(matches!(result, Err(TrackStoreError::Storage(_))));

        let after = db.get_track(1).unwrap().unwrap();
        assert_eq!(db.count_points(1).unwrap(), 1);
        assert_eq!(after.number_of_points, before.number_of_points);
        assert_eq!(after.bounding_box, before.bounding_box);
    }

    #[test]
    fn test_out_of_range_fix_rejected() {
        let db = db_with_points(1, 2);
        let before = db.get_track(1).unwrap().unwrap();

        let result = db.insert_point(&TrackPoint::fix(3000.0, 0.0, 0), 1);
        assert!(matches!(result, Err(TrackStoreError::InvalidArgument(_))));

        let mut points = sample_points(3);
        points.push(TrackPoint::fix(0.0, -181.0, 0));
        let result = db.bulk_insert_points(&points, None, 1);
        assert!(matches!(result, Err(TrackStoreError::InvalidArgument(_))));

        assert_eq!(db.count_points(1).unwrap(), 2);
        assert_eq!(db.get_track(1).unwrap().unwrap(), before);
    }

    #[test]
    fn test_first_and_last_point_id() {
        let db = db_with_points(1, 10);
        assert_eq!(db.first_point_id(1).unwrap(), Some(1));
        assert_eq!(db.last_point_id(1).unwrap(), Some(10));
        assert_eq!(db.first_point_id(2).unwrap(), None);
        assert_eq!(db.last_point_id(2).unwrap(), None);
    }

    #[test]
    fn test_point_roundtrip() {
        let db = db_with_points(1, 10);
        let point = &db.track_points(1, Some(4), 1, false).unwrap()[0];
        assert_eq!(point.id, 4);
        assert_eq!(point.track_id, 1);
        assert_eq!(point.position, sample_point(3).position);
        assert_eq!(point.accuracy, Some(0.03));
        assert_eq!(point.altitude, Some(7.5));
        assert_eq!(point.time, 3_000);
        assert!(point.speed.is_none());
    }

    #[test]
    fn test_sensor_payload_roundtrip() {
        let db = db_with_points(1, 0);
        let point = TrackPoint::fix(22.0, 11.0, 5)
            .with_speed(2.2)
            .with_sensor(b"Sensor state".to_vec());
        let id = db.insert_point(&point, 1).unwrap();

        let stored = db.last_valid_point(1).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.sensor.as_deref(), Some(&b"Sensor state"[..]));
        assert_eq!(stored.speed, Some(2.2));
        assert_eq!(stored.position.latitude(), Some(22.0));
        assert_eq!(stored.position.longitude(), Some(11.0));
    }

    #[test]
    fn test_last_valid_point() {
        let db = db_with_points(1, 10);
        let last = db.last_valid_point(1).unwrap().unwrap();
        assert_eq!(last.position, sample_point(9).position);
        assert_eq!(last.altitude, Some(22.5));

        db.insert_point(&TrackPoint::placeholder(99_000), 1).unwrap();
        db.insert_point(&TrackPoint::placeholder(99_500), 1).unwrap();
        let last = db.last_valid_point(1).unwrap().unwrap();
        assert_eq!(last.id, 10);

        assert!(db.last_valid_point(2).unwrap().is_none());
    }

    #[test]
    fn test_track_points_cursor() {
        let db = db_with_points(1, 10);
        assert_eq!(db.track_points(1, Some(2), 5, true).unwrap().len(), 2);
        assert_eq!(db.track_points(1, Some(2), 5, false).unwrap().len(), 5);
        assert_eq!(db.track_points(1, None, 1000, false).unwrap().len(), 10);
    }

    #[test]
    fn test_point_range_window() {
        let db = db_with_points(1, 10);
        let ids: Vec<i64> = db
            .get_point_range(&PointQuery::new(1, 100).min_id(3).max_id(6).descending(true))
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![6, 5, 4, 3]);

        let ids: Vec<i64> = db
            .get_point_range(&PointQuery::new(1, 2).min_id(3))
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_point_range_rejects_bad_windows() {
        let db = db_with_points(1, 10);
        let inverted = db.get_point_range(&PointQuery::new(1, 10).min_id(6).max_id(3));
        assert!(matches!(inverted, Err(TrackStoreError::InvalidArgument(_))));

        let zero = db.get_point_range(&PointQuery::new(1, 0));
        assert!(matches!(zero, Err(TrackStoreError::InvalidArgument(_))));

        let single = db
            .get_point_range(&PointQuery::new(1, 10).min_id(4).max_id(4))
            .unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_bounding_box_tracks_fixes() {
        let db = db_with_points(1, 10);
        db.insert_point(&TrackPoint::placeholder(0), 1).unwrap();

        let bounds = db.get_track(1).unwrap().unwrap().bounding_box.unwrap();
        let expected =
            BoundingBoxE6::from_positions(sample_points(10).iter().map(|p| p.position)).unwrap();
        assert_eq!(bounds, expected);
        assert_eq!(bounds.north, 37_000_900);
        assert_eq!(bounds.west, -57_000_900);
    }

    #[test]
    fn test_delete_points_for_track_resets_aggregate() {
        let db = db_with_points(1, 10);
        db.insert_track(&Track::new(2, "other")).unwrap();
        db.bulk_insert_points(&sample_points(4), None, 2).unwrap();

        assert_eq!(db.delete_all_points_for_track(1).unwrap(), 10);
        let track = db.get_track(1).unwrap().unwrap();
        assert_eq!(track.number_of_points, 0);
        assert!(track.bounding_box.is_none());
        assert_eq!(db.count_points(2).unwrap(), 4);
        assert_eq!(db.get_track(2).unwrap().unwrap().number_of_points, 4);

        assert_eq!(db.delete_all_points().unwrap(), 4);
        assert_eq!(db.get_track(2).unwrap().unwrap().number_of_points, 0);
    }

    #[test]
    fn test_ids_keep_increasing_after_delete() {
        let db = db_with_points(1, 5);
        db.delete_all_points_for_track(1).unwrap();
        let id = db.insert_point(&sample_point(0), 1).unwrap();
        assert_eq!(id, 6);
    }
}

//! # Waypoint Store
//!
//! Markers attached to tracks. Ids are assigned by the store and increase in
//! insertion order, which is what "first", "last" and "next number" refer to.
//!
//! Statistics waypoints carry a description that summarizes the segment since
//! the previous statistics waypoint, so deleting one regenerates the
//! description of the next one.

use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{decode_stats, encode_stats, TrackDb};
use crate::error::Result;
use crate::types::{Position, TripStatistics, Waypoint, WaypointLocation, WaypointType};

const WAYPOINT_COLUMNS: &str = "id, track_id, name, description, category, icon_url, \
     waypoint_type, latitude_e6, longitude_e6, altitude, accuracy, time, stats";

/// Builds the description of a statistics waypoint.
pub trait DescriptionGenerator {
    fn generate_waypoint_description(&self, statistics: &TripStatistics) -> String;
}

impl<F> DescriptionGenerator for F
where
    F: Fn(&TripStatistics) -> String,
{
    fn generate_waypoint_description(&self, statistics: &TripStatistics) -> String {
        self(statistics)
    }
}

/// Plain-text summary of distance, times, speeds and elevation gain.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryDescription;

impl DescriptionGenerator for SummaryDescription {
    fn generate_waypoint_description(&self, statistics: &TripStatistics) -> String {
        format!(
            "Total distance: {:.2} km\nTotal time: {}\nMoving time: {}\n\
             Average speed: {:.1} km/h\nAverage moving speed: {:.1} km/h\n\
             Max speed: {:.1} km/h\nElevation gain: {:.0} m",
            statistics.total_distance / 1000.0,
            format_duration(statistics.total_time),
            format_duration(statistics.moving_time),
            statistics.average_speed() * 3.6,
            statistics.average_moving_speed() * 3.6,
            statistics.max_speed * 3.6,
            statistics.total_elevation_gain,
        )
    }
}

/// Format milliseconds as `h:mm:ss`.
fn format_duration(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn waypoint_from_row(row: &Row<'_>) -> rusqlite::Result<Waypoint> {
    let type_code: i64 = row.get(6)?;
    let waypoint_type = WaypointType::from_i64(type_code).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(6, type_code)
    })?;

    let time: Option<i64> = row.get(11)?;
    let accuracy: Option<f64> = row.get(10)?;
    let location = time.map(|time| -> rusqlite::Result<WaypointLocation> {
        Ok(WaypointLocation {
            position: Position::from_columns(row.get(7)?, row.get(8)?),
            altitude: row.get(9)?,
            accuracy: accuracy.map(|a| a as f32),
            time,
        })
    });

    Ok(Waypoint {
        id: row.get(0)?,
        track_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        icon_url: row.get(5)?,
        waypoint_type,
        location: location.transpose()?,
        trip_statistics: decode_stats(row.get(12)?, 12)?,
    })
}

type LocationColumns = (Option<i32>, Option<i32>, Option<f64>, Option<f64>, Option<i64>);

fn location_columns(location: Option<&WaypointLocation>) -> Result<LocationColumns> {
    match location {
        Some(loc) => {
            loc.position.validate()?;
            let (lat, lon) = loc.position.to_columns();
            Ok((
                lat,
                lon,
                loc.altitude,
                loc.accuracy.map(f64::from),
                Some(loc.time),
            ))
        }
        None => Ok((None, None, None, None, None)),
    }
}

fn get_waypoint_row(conn: &Connection, waypoint_id: i64) -> Result<Option<Waypoint>> {
    let waypoint = conn
        .query_row(
            &format!("SELECT {} FROM waypoints WHERE id = ?", WAYPOINT_COLUMNS),
            params![waypoint_id],
            waypoint_from_row,
        )
        .optional()?;
    Ok(waypoint)
}

impl TrackDb {
    /// Store a waypoint and return its new id.
    ///
    /// The track is not required to exist.
    pub fn insert_waypoint(&self, waypoint: &Waypoint) -> Result<i64> {
        let stats = encode_stats(waypoint.trip_statistics.as_ref())?;
        let (lat, lon, altitude, accuracy, time) = location_columns(waypoint.location.as_ref())?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO waypoints (track_id, name, description, category, icon_url,
             waypoint_type, latitude_e6, longitude_e6, altitude, accuracy, time, stats)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                waypoint.track_id,
                waypoint.name,
                waypoint.description,
                waypoint.category,
                waypoint.icon_url,
                waypoint.waypoint_type.as_i64(),
                lat,
                lon,
                altitude,
                accuracy,
                time,
                stats
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a waypoint by id.
    pub fn get_waypoint(&self, waypoint_id: i64) -> Result<Option<Waypoint>> {
        let conn = self.lock()?;
        get_waypoint_row(&conn, waypoint_id)
    }

    /// Overwrite every field of a stored waypoint except its id.
    ///
    /// Returns `false` if no waypoint has that id.
    pub fn update_waypoint(&self, waypoint: &Waypoint) -> Result<bool> {
        let stats = encode_stats(waypoint.trip_statistics.as_ref())?;
        let (lat, lon, altitude, accuracy, time) = location_columns(waypoint.location.as_ref())?;
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE waypoints SET track_id = ?, name = ?, description = ?, category = ?,
             icon_url = ?, waypoint_type = ?, latitude_e6 = ?, longitude_e6 = ?, altitude = ?,
             accuracy = ?, time = ?, stats = ?
             WHERE id = ?",
            params![
                waypoint.track_id,
                waypoint.name,
                waypoint.description,
                waypoint.category,
                waypoint.icon_url,
                waypoint.waypoint_type.as_i64(),
                lat,
                lon,
                altitude,
                accuracy,
                time,
                stats,
                waypoint.id
            ],
        )?;
        Ok(updated > 0)
    }

    /// All waypoints of a track in id order.
    pub fn waypoints_for_track(&self, track_id: i64) -> Result<Vec<Waypoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM waypoints WHERE track_id = ? ORDER BY id",
            WAYPOINT_COLUMNS
        ))?;
        let waypoints = stmt
            .query_map(params![track_id], waypoint_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(waypoints)
    }

    /// Id of the first waypoint (of any type) of a track.
    pub fn first_waypoint_id(&self, track_id: i64) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM waypoints WHERE track_id = ? ORDER BY id ASC LIMIT 1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// The most recently inserted waypoint of the given type on a track.
    pub fn last_waypoint(
        &self,
        track_id: i64,
        waypoint_type: WaypointType,
    ) -> Result<Option<Waypoint>> {
        let conn = self.lock()?;
        let waypoint = conn
            .query_row(
                &format!(
                    "SELECT {} FROM waypoints WHERE track_id = ? AND waypoint_type = ?
                     ORDER BY id DESC LIMIT 1",
                    WAYPOINT_COLUMNS
                ),
                params![track_id, waypoint_type.as_i64()],
                waypoint_from_row,
            )
            .optional()?;
        Ok(waypoint)
    }

    /// Number the next waypoint of this type on this track would get:
    /// one more than the waypoints of that type already stored.
    pub fn next_waypoint_number(&self, track_id: i64, waypoint_type: WaypointType) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM waypoints WHERE track_id = ? AND waypoint_type = ?",
            params![track_id, waypoint_type.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count + 1)
    }

    /// Delete a waypoint.
    ///
    /// When a statistics waypoint is removed, the next statistics waypoint on
    /// the same track (if any) gets its description rebuilt by `generator` from
    /// its own statistics. Both changes commit together. The generator runs
    /// while the store is locked and must not call back into it.
    ///
    /// Returns `false` if no waypoint has that id.
    pub fn delete_waypoint(
        &self,
        waypoint_id: i64,
        generator: &dyn DescriptionGenerator,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(waypoint) = get_waypoint_row(&tx, waypoint_id)? else {
            return Ok(false);
        };

        if waypoint.waypoint_type == WaypointType::Statistics {
            let next = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM waypoints
                         WHERE track_id = ? AND waypoint_type = ? AND id > ?
                         ORDER BY id ASC LIMIT 1",
                        WAYPOINT_COLUMNS
                    ),
                    params![
                        waypoint.track_id,
                        WaypointType::Statistics.as_i64(),
                        waypoint_id
                    ],
                    waypoint_from_row,
                )
                .optional()?;

            if let Some(next) = next {
                let statistics = next.trip_statistics.unwrap_or_default();
                let description = generator.generate_waypoint_description(&statistics);
                tx.execute(
                    "UPDATE waypoints SET description = ? WHERE id = ?",
                    params![description, next.id],
                )?;
                debug!(
                    "[TrackStore] Regenerated description of waypoint {} after deleting {}",
                    next.id, waypoint_id
                );
            }
        }

        tx.execute("DELETE FROM waypoints WHERE id = ?", params![waypoint_id])?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBoxE6, Track};

    const MOCK_DESC: &str = "Mock Next Waypoint Desc!";
    const TEST_DESC: &str = "Test Desc!";

    fn mock_generator(_: &TripStatistics) -> String {
        MOCK_DESC.to_string()
    }

    fn sample_statistics() -> TripStatistics {
        TripStatistics {
            start_time: 1000,
            stop_time: 2500,
            total_time: 1500,
            moving_time: 700,
            total_distance: 750.0,
            total_elevation_gain: 50.0,
            max_speed: 60.0,
            max_elevation: 1250.0,
            min_elevation: 1200.0,
            max_grade: 15.0,
            min_grade: -25.0,
            bounding_box: Some(BoundingBoxE6 {
                north: 30000,
                south: -40000,
                east: 20000,
                west: -10000,
            }),
        }
    }

    fn db_with_track(track_id: i64) -> TrackDb {
        let db = TrackDb::in_memory().unwrap();
        db.insert_track(&Track::new(track_id, "test")).unwrap();
        db
    }

    #[test]
    fn test_insert_and_get_waypoint() {
        let db = db_with_track(1);
        let id = db
            .insert_waypoint(&Waypoint::new(1, WaypointType::Waypoint).with_description(TEST_DESC))
            .unwrap();
        assert_eq!(id, 1);
        let stored = db.get_waypoint(id).unwrap().unwrap();
        assert_eq!(stored.description, TEST_DESC);
        assert!(stored.location.is_none());
        assert!(db.get_waypoint(2).unwrap().is_none());
    }

    #[test]
    fn test_waypoint_with_location_and_statistics() {
        let db = db_with_track(1);
        let mut waypoint =
            Waypoint::new(1, WaypointType::Statistics).with_statistics(sample_statistics());
        waypoint.location = Some(WaypointLocation {
            position: Position::from_degrees(22.0, 22.0),
            altitude: Some(2.5),
            accuracy: Some(0.01),
            time: 42,
        });
        let id = db.insert_waypoint(&waypoint).unwrap();

        let stored = db.get_waypoint(id).unwrap().unwrap();
        let location = stored.location.unwrap();
        assert_eq!(location.position.longitude(), Some(22.0));
        assert_eq!(location.accuracy, Some(0.01));
        assert_eq!(stored.trip_statistics, Some(sample_statistics()));
        assert_eq!(stored.waypoint_type, WaypointType::Statistics);
    }

    #[test]
    fn test_out_of_range_location_rejected() {
        let db = db_with_track(1);
        let mut waypoint = Waypoint::new(1, WaypointType::Waypoint);
        waypoint.location = Some(WaypointLocation {
            position: Position::from_degrees(95.0, 0.0),
            ..Default::default()
        });
        assert!(matches!(
            db.insert_waypoint(&waypoint),
            Err(crate::error::TrackStoreError::InvalidArgument(_))
        ));
        assert!(db.waypoints_for_track(1).unwrap().is_empty());
    }

    #[test]
    fn test_update_waypoint() {
        let db = db_with_track(1);
        let id = db
            .insert_waypoint(&Waypoint::new(1, WaypointType::Waypoint).with_description(TEST_DESC))
            .unwrap();

        let mut waypoint = db.get_waypoint(id).unwrap().unwrap();
        waypoint.description = "Test Desc new!".to_string();
        assert!(db.update_waypoint(&waypoint).unwrap());
        assert_eq!(
            db.get_waypoint(id).unwrap().unwrap().description,
            "Test Desc new!"
        );

        waypoint.id = 99;
        assert!(!db.update_waypoint(&waypoint).unwrap());
    }

    #[test]
    fn test_first_waypoint_id() {
        let db = db_with_track(5);
        db.insert_waypoint(&Waypoint::new(5, WaypointType::Waypoint))
            .unwrap();
        db.insert_waypoint(&Waypoint::new(5, WaypointType::Waypoint))
            .unwrap();
        assert_eq!(db.first_waypoint_id(-1).unwrap(), None);
        assert_eq!(db.first_waypoint_id(5).unwrap(), Some(1));
    }

    #[test]
    fn test_next_waypoint_number() {
        let db = db_with_track(1);
        for t in [
            WaypointType::Statistics,
            WaypointType::Waypoint,
            WaypointType::Statistics,
            WaypointType::Waypoint,
        ] {
            db.insert_waypoint(&Waypoint::new(1, t)).unwrap();
        }
        assert_eq!(
            db.next_waypoint_number(1, WaypointType::Statistics).unwrap(),
            3
        );
        assert_eq!(db.next_waypoint_number(1, WaypointType::Waypoint).unwrap(), 3);
        assert_eq!(db.next_waypoint_number(2, WaypointType::Waypoint).unwrap(), 1);
    }

    #[test]
    fn test_last_statistics_waypoint() {
        let db = db_with_track(1);
        db.insert_waypoint(&Waypoint::new(1, WaypointType::Statistics).with_description("Desc1"))
            .unwrap();
        db.insert_waypoint(&Waypoint::new(1, WaypointType::Statistics).with_description("Desc2"))
            .unwrap();
        db.insert_waypoint(&Waypoint::new(1, WaypointType::Waypoint).with_description("Desc3"))
            .unwrap();

        let last = db.last_waypoint(1, WaypointType::Statistics).unwrap().unwrap();
        assert_eq!(last.description, "Desc2");
        assert!(db.last_waypoint(2, WaypointType::Statistics).unwrap().is_none());
    }

    #[test]
    fn test_delete_only_waypoint() {
        let db = db_with_track(1);
        let id = db
            .insert_waypoint(
                &Waypoint::new(1, WaypointType::Statistics).with_description(TEST_DESC),
            )
            .unwrap();
        assert!(db.delete_waypoint(id, &mock_generator).unwrap());
        assert!(db.get_waypoint(id).unwrap().is_none());
        assert!(!db.delete_waypoint(id, &mock_generator).unwrap());
    }

    #[test]
    fn test_delete_regenerates_next_statistics_waypoint() {
        let db = db_with_track(1);
        let make = || {
            Waypoint::new(1, WaypointType::Statistics)
                .with_description("1")
                .with_statistics(sample_statistics())
        };
        let first = db.insert_waypoint(&make()).unwrap();
        let second = db.insert_waypoint(&make()).unwrap();

        assert!(db.delete_waypoint(first, &mock_generator).unwrap());

        assert!(db.get_waypoint(first).unwrap().is_none());
        assert_eq!(db.get_waypoint(second).unwrap().unwrap().description, MOCK_DESC);
    }

    #[test]
    fn test_delete_uses_next_waypoints_own_statistics() {
        let db = db_with_track(1);
        let first = db
            .insert_waypoint(&Waypoint::new(1, WaypointType::Statistics).with_statistics(
                TripStatistics {
                    total_distance: 1.0,
                    ..Default::default()
                },
            ))
            .unwrap();
        db.insert_waypoint(&Waypoint::new(1, WaypointType::Waypoint))
            .unwrap();
        let next = db
            .insert_waypoint(&Waypoint::new(1, WaypointType::Statistics).with_statistics(
                TripStatistics {
                    total_distance: 2.0,
                    ..Default::default()
                },
            ))
            .unwrap();

        let generator = |s: &TripStatistics| format!("{}", s.total_distance);
        db.delete_waypoint(first, &generator).unwrap();
        assert_eq!(db.get_waypoint(next).unwrap().unwrap().description, "2");
    }

    #[test]
    fn test_delete_plain_waypoint_leaves_others() {
        let db = db_with_track(1);
        let plain = db
            .insert_waypoint(&Waypoint::new(1, WaypointType::Waypoint))
            .unwrap();
        let stats = db
            .insert_waypoint(
                &Waypoint::new(1, WaypointType::Statistics).with_description("keep"),
            )
            .unwrap();
        db.delete_waypoint(plain, &mock_generator).unwrap();
        assert_eq!(db.get_waypoint(stats).unwrap().unwrap().description, "keep");
    }

    #[test]
    fn test_summary_description() {
        let text = SummaryDescription.generate_waypoint_description(&sample_statistics());
        assert!(text.contains("Total distance: 0.75 km"));
        assert!(text.contains("Total time: 0:00:01"));
        assert!(text.contains("Elevation gain: 50 m"));
        // 750 m in 0.7 s of moving time
        assert!(text.contains("Average moving speed: 3857.1 km/h"));
    }
}

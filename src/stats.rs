//! # Trip Statistics
//!
//! Point classification helpers and a fold that turns a stream of track
//! points into a [`TripStatistics`] snapshot.
//!
//! Distances are great-circle (haversine) meters between consecutive fixes.
//! A placeholder ends the current segment: no distance, elevation gain or
//! grade is measured across it.

use geo::{Distance, Haversine, Point};

use crate::db::TrackDb;
use crate::error::Result;
use crate::types::{BoundingBoxE6, Position, TrackPoint, TripStatistics};

/// Speed (m/s) at or above which a point counts as moving.
pub const MAX_NO_MOVEMENT_SPEED: f32 = 0.224;

/// Minimum horizontal run (meters) a grade is measured over.
const MIN_GRADE_DISTANCE: f64 = 5.0;

/// Whether the point reports a speed of at least [`MAX_NO_MOVEMENT_SPEED`].
pub fn is_moving(point: &TrackPoint) -> bool {
    point.speed.is_some_and(|s| s >= MAX_NO_MOVEMENT_SPEED)
}

/// Whether the point reports an accuracy better than `poor_accuracy` meters.
pub fn fulfills_accuracy(point: &TrackPoint, poor_accuracy: f32) -> bool {
    point.accuracy.is_some_and(|a| a < poor_accuracy)
}

fn to_geo_point(position: Position) -> Option<Point<f64>> {
    Some(Point::new(position.longitude()?, position.latitude()?))
}

/// Last fix of the open segment.
#[derive(Debug, Clone, Copy)]
struct SegmentTail {
    point: Point<f64>,
    altitude: Option<f64>,
}

/// Start of the stretch the next grade is measured over.
#[derive(Debug, Clone, Copy)]
struct GradeAnchor {
    run: f64,
    altitude: f64,
}

/// Folds points, in id order, into trip statistics.
#[derive(Debug, Default)]
pub struct TripStatisticsBuilder {
    stats: TripStatistics,
    started: bool,
    last_time: Option<i64>,
    tail: Option<SegmentTail>,
    anchor: Option<GradeAnchor>,
    segment_run: f64,
    min_elevation: Option<f64>,
    max_elevation: Option<f64>,
    min_grade: Option<f64>,
    max_grade: Option<f64>,
    bounds: Option<BoundingBoxE6>,
}

impl TripStatisticsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: &TrackPoint) {
        if !self.started {
            self.started = true;
            self.stats.start_time = point.time;
        }
        self.stats.stop_time = point.time;
        self.stats.total_time = self.stats.stop_time - self.stats.start_time;

        if let Some(last_time) = self.last_time {
            let elapsed = point.time - last_time;
            if elapsed > 0 && is_moving(point) {
                self.stats.moving_time += elapsed;
            }
        }
        self.last_time = Some(point.time);

        if let Some(speed) = point.speed {
            self.stats.max_speed = self.stats.max_speed.max(f64::from(speed));
        }

        let Some(geo_point) = to_geo_point(point.position) else {
            self.end_segment();
            return;
        };
        self.bounds = BoundingBoxE6::include(self.bounds, point.position);

        if let Some(altitude) = point.altitude {
            self.min_elevation = Some(self.min_elevation.map_or(altitude, |m| m.min(altitude)));
            self.max_elevation = Some(self.max_elevation.map_or(altitude, |m| m.max(altitude)));
        }

        if let Some(tail) = self.tail {
            let step = Haversine::distance(tail.point, geo_point);
            self.stats.total_distance += step;
            self.segment_run += step;

            if let (Some(previous), Some(current)) = (tail.altitude, point.altitude) {
                if current > previous {
                    self.stats.total_elevation_gain += current - previous;
                }
            }
        }

        self.update_grade(point.altitude);
        self.tail = Some(SegmentTail {
            point: geo_point,
            altitude: point.altitude,
        });
    }

    fn update_grade(&mut self, altitude: Option<f64>) {
        let Some(altitude) = altitude else {
            return;
        };
        match self.anchor {
            None => {
                self.anchor = Some(GradeAnchor {
                    run: self.segment_run,
                    altitude,
                })
            }
            Some(anchor) => {
                let run = self.segment_run - anchor.run;
                if run > MIN_GRADE_DISTANCE {
                    let grade = (altitude - anchor.altitude) / run;
                    self.min_grade = Some(self.min_grade.map_or(grade, |g| g.min(grade)));
                    self.max_grade = Some(self.max_grade.map_or(grade, |g| g.max(grade)));
                    self.anchor = Some(GradeAnchor {
                        run: self.segment_run,
                        altitude,
                    });
                }
            }
        }
    }

    fn end_segment(&mut self) {
        self.tail = None;
        self.anchor = None;
        self.segment_run = 0.0;
    }

    pub fn build(self) -> TripStatistics {
        TripStatistics {
            min_elevation: self.min_elevation.unwrap_or_default(),
            max_elevation: self.max_elevation.unwrap_or_default(),
            min_grade: self.min_grade.unwrap_or_default(),
            max_grade: self.max_grade.unwrap_or_default(),
            bounding_box: self.bounds,
            ..self.stats
        }
    }
}

impl Extend<TrackPoint> for TripStatisticsBuilder {
    fn extend<I: IntoIterator<Item = TrackPoint>>(&mut self, points: I) {
        for point in points {
            self.add_point(&point);
        }
    }
}

impl TrackDb {
    /// Compute statistics over every point of a track, streaming in batches.
    pub fn trip_statistics(&self, track_id: i64) -> Result<TripStatistics> {
        let mut builder = TripStatisticsBuilder::new();
        for point in self.points(track_id, None, false)? {
            builder.add_point(&point?);
        }
        Ok(builder.build())
    }
}

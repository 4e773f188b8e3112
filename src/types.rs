//! Record types for tracks, track points and waypoints.
//!
//! Coordinates are stored as E6 fixed-point integers (microdegrees), which is
//! also how they are persisted.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackStoreError};

const E6: f64 = 1_000_000.0;

const MAX_LATITUDE_E6: u32 = 90_000_000;
const MAX_LONGITUDE_E6: u32 = 180_000_000;

/// Convert degrees to microdegrees.
///
/// Saturates at the `i32` range; out-of-range results are caught by
/// [`Position::validate`] before anything is stored.
#[inline]
pub fn to_e6(degrees: f64) -> i32 {
    (degrees * E6).round() as i32
}

/// Convert microdegrees to degrees.
#[inline]
pub fn from_e6(microdegrees: i32) -> f64 {
    microdegrees as f64 / E6
}

// ============================================================================
// Position
// ============================================================================

/// Position of a sample: either a real fix or a placeholder with no position
/// (pause markers and similar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    Fix { latitude_e6: i32, longitude_e6: i32 },
    #[default]
    Placeholder,
}

impl Position {
    /// Create a fix from degrees without range checks.
    ///
    /// Stores refuse fixes outside the valid range, so an out-of-range fix
    /// built here fails on insert rather than being stored saturated.
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Position::Fix {
            latitude_e6: to_e6(latitude),
            longitude_e6: to_e6(longitude),
        }
    }

    /// Create a fix from degrees, rejecting latitudes outside ±90 and
    /// longitudes outside ±180.
    pub fn try_from_degrees(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(TrackStoreError::InvalidArgument(format!(
                "coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }
        Ok(Self::from_degrees(latitude, longitude))
    }

    /// Check that a fix lies on the globe. Placeholders always pass.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Position::Fix {
                latitude_e6,
                longitude_e6,
            } if latitude_e6.unsigned_abs() > MAX_LATITUDE_E6
                || longitude_e6.unsigned_abs() > MAX_LONGITUDE_E6 =>
            {
                Err(TrackStoreError::InvalidArgument(format!(
                    "coordinates out of range: {}, {}",
                    from_e6(latitude_e6),
                    from_e6(longitude_e6)
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn is_fix(&self) -> bool {
        matches!(self, Position::Fix { .. })
    }

    /// Latitude in degrees, `None` for placeholders.
    pub fn latitude(&self) -> Option<f64> {
        match self {
            Position::Fix { latitude_e6, .. } => Some(from_e6(*latitude_e6)),
            Position::Placeholder => None,
        }
    }

    /// Longitude in degrees, `None` for placeholders.
    pub fn longitude(&self) -> Option<f64> {
        match self {
            Position::Fix { longitude_e6, .. } => Some(from_e6(*longitude_e6)),
            Position::Placeholder => None,
        }
    }

    /// Split into nullable columns for storage.
    pub(crate) fn to_columns(self) -> (Option<i32>, Option<i32>) {
        match self {
            Position::Fix {
                latitude_e6,
                longitude_e6,
            } => (Some(latitude_e6), Some(longitude_e6)),
            Position::Placeholder => (None, None),
        }
    }

    /// Rebuild from nullable columns. Half a coordinate is not a fix.
    pub(crate) fn from_columns(latitude_e6: Option<i32>, longitude_e6: Option<i32>) -> Self {
        match (latitude_e6, longitude_e6) {
            (Some(latitude_e6), Some(longitude_e6)) => Position::Fix {
                latitude_e6,
                longitude_e6,
            },
            _ => Position::Placeholder,
        }
    }
}

// ============================================================================
// Bounding Box
// ============================================================================

/// Bounding box in microdegrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBoxE6 {
    pub north: i32,
    pub south: i32,
    pub east: i32,
    pub west: i32,
}

impl BoundingBoxE6 {
    /// Degenerate box around a single fix.
    pub fn around(latitude_e6: i32, longitude_e6: i32) -> Self {
        Self {
            north: latitude_e6,
            south: latitude_e6,
            east: longitude_e6,
            west: longitude_e6,
        }
    }

    /// Grow the box to include a fix.
    pub fn extend(&mut self, latitude_e6: i32, longitude_e6: i32) {
        self.north = self.north.max(latitude_e6);
        self.south = self.south.min(latitude_e6);
        self.east = self.east.max(longitude_e6);
        self.west = self.west.min(longitude_e6);
    }

    /// Extend an optional box with a position; placeholders leave it untouched.
    pub fn include(bounds: Option<Self>, position: Position) -> Option<Self> {
        match position {
            Position::Fix {
                latitude_e6,
                longitude_e6,
            } => match bounds {
                Some(mut b) => {
                    b.extend(latitude_e6, longitude_e6);
                    Some(b)
                }
                None => Some(Self::around(latitude_e6, longitude_e6)),
            },
            Position::Placeholder => bounds,
        }
    }

    /// Bounding box of all fixes in a sequence of positions.
    pub fn from_positions<I: IntoIterator<Item = Position>>(positions: I) -> Option<Self> {
        positions.into_iter().fold(None, Self::include)
    }
}

// ============================================================================
// Track Point
// ============================================================================

/// One recorded sample belonging to a track.
///
/// `id` and `track_id` are assigned by the store; values set on a point passed
/// to an insert are ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackPoint {
    pub id: i64,
    pub track_id: i64,
    pub position: Position,
    /// Milliseconds since the Unix epoch
    pub time: i64,
    /// Meters per second
    pub speed: Option<f32>,
    /// Meters
    pub accuracy: Option<f32>,
    /// Meters above sea level
    pub altitude: Option<f64>,
    /// Opaque sensor payload
    pub sensor: Option<Vec<u8>>,
}

impl TrackPoint {
    /// A sample with a position fix.
    pub fn fix(latitude: f64, longitude: f64, time: i64) -> Self {
        Self {
            position: Position::from_degrees(latitude, longitude),
            time,
            ..Default::default()
        }
    }

    /// A sample without a position.
    pub fn placeholder(time: i64) -> Self {
        Self {
            position: Position::Placeholder,
            time,
            ..Default::default()
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_sensor(mut self, sensor: Vec<u8>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn is_fix(&self) -> bool {
        self.position.is_fix()
    }
}

// ============================================================================
// Track
// ============================================================================

/// A named, ordered collection of recorded samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    /// Externally assigned
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Maintained by the store; ignored on insert and update
    pub number_of_points: i64,
    /// Maintained by the store; ignored on insert and update
    pub bounding_box: Option<BoundingBoxE6>,
    pub statistics: Option<TripStatistics>,
}

impl Track {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Trip Statistics
// ============================================================================

/// Aggregate statistics over a stretch of a track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TripStatistics {
    /// Milliseconds since the Unix epoch
    pub start_time: i64,
    pub stop_time: i64,
    /// Milliseconds
    pub total_time: i64,
    pub moving_time: i64,
    /// Meters
    pub total_distance: f64,
    pub total_elevation_gain: f64,
    /// Meters per second
    pub max_speed: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
    /// Rise over run, as a fraction
    pub min_grade: f64,
    pub max_grade: f64,
    pub bounding_box: Option<BoundingBoxE6>,
}

impl TripStatistics {
    /// Average speed over the total time, in meters per second.
    pub fn average_speed(&self) -> f64 {
        if self.total_time <= 0 {
            return 0.0;
        }
        self.total_distance / (self.total_time as f64 / 1000.0)
    }

    /// Average speed over the moving time, in meters per second.
    pub fn average_moving_speed(&self) -> f64 {
        if self.moving_time <= 0 {
            return 0.0;
        }
        self.total_distance / (self.moving_time as f64 / 1000.0)
    }
}

// ============================================================================
// Waypoint
// ============================================================================

/// Kind of marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WaypointType {
    /// Placed by the user
    #[default]
    Waypoint,
    /// Placed by the recorder, carries a statistics snapshot
    Statistics,
}

impl WaypointType {
    pub fn as_i64(self) -> i64 {
        match self {
            WaypointType::Waypoint => 0,
            WaypointType::Statistics => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(WaypointType::Waypoint),
            1 => Some(WaypointType::Statistics),
            _ => None,
        }
    }
}

/// Location snapshot attached to a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaypointLocation {
    pub position: Position,
    pub altitude: Option<f64>,
    pub accuracy: Option<f32>,
    pub time: i64,
}

/// A marker attached to a track.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waypoint {
    /// Assigned by the store
    pub id: i64,
    pub track_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon_url: String,
    pub waypoint_type: WaypointType,
    pub location: Option<WaypointLocation>,
    pub trip_statistics: Option<TripStatistics>,
}

impl Waypoint {
    pub fn new(track_id: i64, waypoint_type: WaypointType) -> Self {
        Self {
            track_id,
            waypoint_type,
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_statistics(mut self, statistics: TripStatistics) -> Self {
        self.trip_statistics = Some(statistics);
        self
    }
}

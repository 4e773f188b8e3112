//! # Track Store
//!
//! SQLite-backed storage for recorded GPS tracks.
//!
//! This library provides:
//! - Append-only storage of track points with store-assigned, increasing ids
//! - A batched iterator that streams a track's points in either direction
//! - Waypoint storage, including statistics waypoints whose descriptions are
//!   rebuilt when their predecessor is deleted
//! - Track metadata with a store-maintained point count and bounding box, and
//!   cascading deletes
//!
//! ## Quick Start
//!
//! ```rust
//! use trackstore::{Track, TrackDb, TrackPoint};
//!
//! let db = TrackDb::in_memory().unwrap();
//! db.insert_track(&Track::new(1, "Commute")).unwrap();
//!
//! let points = vec![
//!     TrackPoint::fix(51.5074, -0.1278, 0).with_speed(3.0),
//!     TrackPoint::placeholder(1_000),
//!     TrackPoint::fix(51.5080, -0.1290, 2_000).with_speed(3.5),
//! ];
//! assert_eq!(db.bulk_insert_points(&points, None, 1).unwrap(), 3);
//!
//! let track = db.get_track(1).unwrap().unwrap();
//! assert_eq!(track.number_of_points, 3);
//!
//! for point in db.points(1, None, false).unwrap() {
//!     let point = point.unwrap();
//!     println!("{} at {}", point.id, point.time);
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod iterator;
pub mod points;
pub mod schema;
pub mod stats;
pub mod tracks;
pub mod types;
pub mod waypoints;

pub use config::{StoreConfig, DEFAULT_BATCH_SIZE};
pub use db::TrackDb;
pub use error::{OptionExt, Result, TrackStoreError};
pub use iterator::{
    IteratorState, NewPoint, PointFactory, PointIterator, PointSource, SharedPoint,
};
pub use points::PointQuery;
pub use stats::{fulfills_accuracy, is_moving, TripStatisticsBuilder, MAX_NO_MOVEMENT_SPEED};
pub use types::{
    from_e6, to_e6, BoundingBoxE6, Position, Track, TrackPoint, TripStatistics, Waypoint,
    WaypointLocation, WaypointType,
};
pub use waypoints::{DescriptionGenerator, SummaryDescription};

/// Initialize logging for Android.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrackStore"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}

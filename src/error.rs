//! Unified error handling for the track store.
//!
//! Lookups that can legitimately find nothing return `Option`; everything in
//! this enum is a real failure the caller has to deal with.

use thiserror::Error;

/// Unified error type for track store operations.
#[derive(Debug, Error)]
pub enum TrackStoreError {
    /// Caller passed something the store cannot act on
    /// (missing factory, unknown track, malformed id range, zero limit).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Any failure reported by SQLite, propagated unmodified.
    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Trip statistics blob could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// `next_point()` was called on an exhausted or closed iterator.
    #[error("Point iterator has no more points")]
    IteratorExhausted,

    /// A thread panicked while holding the connection lock.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rmp_serde::encode::Error> for TrackStoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TrackStoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TrackStoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TrackStoreError::Serialization(e.to_string())
    }
}

/// Result type alias for track store operations.
pub type Result<T> = std::result::Result<T, TrackStoreError>;

/// Extension trait for converting Option to TrackStoreError.
pub trait OptionExt<T> {
    /// Convert a missing track lookup into an invalid argument error.
    fn ok_or_unknown_track(self, track_id: i64) -> Result<T>;

    /// Convert Option to Result with a generic invalid argument error.
    fn ok_or_invalid(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_unknown_track(self, track_id: i64) -> Result<T> {
        self.ok_or_else(|| {
            TrackStoreError::InvalidArgument(format!("track {} does not exist", track_id))
        })
    }

    fn ok_or_invalid(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackStoreError::InvalidArgument(message.to_string()))
    }
}

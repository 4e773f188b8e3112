//! Store configuration.
//!
//! The iterator batch size lives here and is threaded through
//! [`TrackDb`](crate::TrackDb) into every iterator it creates.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackStoreError};

/// Default number of points fetched per iterator batch.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Configuration for a [`TrackDb`](crate::TrackDb).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Points fetched by one range query while iterating.
    pub batch_size: usize,
    /// How long SQLite waits on a locked database file before failing.
    pub busy_timeout_ms: u64,
    /// Use write-ahead logging for file-backed databases.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig =
            serde_json::from_str(json).map_err(|e| TrackStoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the iterator batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reject values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrackStoreError::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.batch_size, 2000);
        assert!(config.wal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = StoreConfig::from_json(r#"{"batchSize": 25}"#).unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = StoreConfig::from_json(r#"{"batchSize": 0}"#);
        assert!(matches!(result, Err(TrackStoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = StoreConfig::from_json("{batchSize:");
        assert!(matches!(result, Err(TrackStoreError::Config(_))));
    }
}

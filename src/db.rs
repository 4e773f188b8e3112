//! # Track Database
//!
//! Owns the SQLite connection shared by the point store, the waypoint store
//! and the track aggregate manager.
//!
//! The connection sits behind a mutex so one `TrackDb` can be shared between
//! threads with `Arc`. Every public operation holds the lock for its whole
//! duration, and multi-statement mutations run inside a single SQLite
//! transaction. Point iterators only take the lock while fetching a batch.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use rusqlite::types::Type;
use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::{Result, TrackStoreError};
use crate::schema;
use crate::types::TripStatistics;

/// Storage for tracks, their points and their waypoints.
pub struct TrackDb {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl TrackDb {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a database file with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open (or create) a database file.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!("[TrackStore] journal_mode = {}", mode);
        }
        schema::init_schema(&conn)?;

        info!(
            "[TrackStore] Opened {} (batch size {})",
            path.as_ref().display(),
            config.batch_size
        );
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_config(StoreConfig::default())
    }

    /// Create an in-memory database with a custom configuration.
    pub fn in_memory_with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Lock the connection for one operation.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TrackStoreError::LockPoisoned)
    }
}

// ============================================================================
// Statistics blobs
// ============================================================================

/// Encode optional statistics as a MessagePack blob.
pub(crate) fn encode_stats(stats: Option<&TripStatistics>) -> Result<Option<Vec<u8>>> {
    stats
        .map(|s| rmp_serde::to_vec(s).map_err(TrackStoreError::from))
        .transpose()
}

/// Decode a statistics blob inside a row mapper.
pub(crate) fn decode_stats(
    blob: Option<Vec<u8>>,
    column: usize,
) -> rusqlite::Result<Option<TripStatistics>> {
    blob.map(|bytes| {
        rmp_serde::from_slice(&bytes)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Blob, Box::new(e)))
    })
    .transpose()
}

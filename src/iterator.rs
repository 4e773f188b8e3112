//! # Batched Point Iterator
//!
//! Streams the points of one track in either direction with bounded memory.
//!
//! The iterator keeps at most one batch of points in memory. When the batch
//! runs out it issues exactly one range query for the next batch, bounded by
//! the id of the last point it handed out (`last + 1` ascending, `last - 1`
//! descending). A batch shorter than the batch size ends the scan, so no
//! query is issued past the end of the track.
//!
//! ## States
//!
//! | State        | Meaning                                         |
//! |--------------|-------------------------------------------------|
//! | `NotStarted` | nothing fetched yet                             |
//! | `InBatch`    | serving points from the current batch           |
//! | `Exhausted`  | the last batch was short and has been consumed  |
//! | `Closed`     | closed by the caller or by a storage error      |
//!
//! ## Example
//!
//! ```rust
//! use trackstore::{Track, TrackDb, TrackPoint};
//!
//! let db = TrackDb::in_memory().unwrap();
//! db.insert_track(&Track::new(1, "Morning ride")).unwrap();
//! let points: Vec<TrackPoint> = (0..5)
//!     .map(|i| TrackPoint::fix(51.5 + i as f64 * 0.001, -0.12, i * 1000))
//!     .collect();
//! db.bulk_insert_points(&points, None, 1).unwrap();
//!
//! let ids: Vec<i64> = db
//!     .points(1, None, true)
//!     .unwrap()
//!     .map(|p| p.unwrap().id)
//!     .collect();
//! assert_eq!(ids, vec![5, 4, 3, 2, 1]);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::rc::Rc;

use log::{debug, trace};

use crate::db::TrackDb;
use crate::error::{OptionExt, Result, TrackStoreError};
use crate::points::{query_point_range, PointQuery};
use crate::types::TrackPoint;

// ============================================================================
// Point source
// ============================================================================

/// Anything that can answer one id-window query over a track's points.
pub trait PointSource {
    fn point_range(&self, query: &PointQuery) -> Result<Vec<TrackPoint>>;
}

impl PointSource for TrackDb {
    /// Holds the connection lock only for the duration of the query.
    fn point_range(&self, query: &PointQuery) -> Result<Vec<TrackPoint>> {
        let conn = self.lock()?;
        query_point_range(&conn, query)
    }
}

impl<S: PointSource + ?Sized> PointSource for &S {
    fn point_range(&self, query: &PointQuery) -> Result<Vec<TrackPoint>> {
        (**self).point_range(query)
    }
}

// ============================================================================
// Point factories
// ============================================================================

/// Turns each fetched row into whatever the caller wants to receive.
pub trait PointFactory {
    type Output;

    fn materialize(&mut self, point: TrackPoint) -> Self::Output;
}

/// Hands out every row as a fresh `TrackPoint`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewPoint;

impl PointFactory for NewPoint {
    type Output = TrackPoint;

    fn materialize(&mut self, point: TrackPoint) -> TrackPoint {
        point
    }
}

/// Overwrites one caller-owned record in place and hands back a handle to it.
///
/// Every call to `next_point()` invalidates the previous value, so callers must
/// copy out what they need before advancing.
#[derive(Debug, Clone, Default)]
pub struct SharedPoint {
    slot: Rc<RefCell<TrackPoint>>,
}

impl SharedPoint {
    pub fn new(slot: Rc<RefCell<TrackPoint>>) -> Self {
        Self { slot }
    }

    /// The record being overwritten.
    pub fn slot(&self) -> Rc<RefCell<TrackPoint>> {
        Rc::clone(&self.slot)
    }
}

impl PointFactory for SharedPoint {
    type Output = Rc<RefCell<TrackPoint>>;

    fn materialize(&mut self, point: TrackPoint) -> Self::Output {
        self.slot.borrow_mut().clone_from(&point);
        Rc::clone(&self.slot)
    }
}

impl<T, F> PointFactory for F
where
    F: FnMut(TrackPoint) -> T,
{
    type Output = T;

    fn materialize(&mut self, point: TrackPoint) -> T {
        self(point)
    }
}

// ============================================================================
// Iterator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    NotStarted,
    InBatch,
    Exhausted,
    Closed,
}

/// Lazy, direction-aware cursor over the points of one track.
///
/// Not restartable: create a new iterator to scan again. Not internally
/// synchronized; use it from one thread at a time.
pub struct PointIterator<S: PointSource, F: PointFactory> {
    source: S,
    factory: F,
    track_id: i64,
    start_id: Option<i64>,
    descending: bool,
    batch_size: usize,
    state: IteratorState,
    buffer: VecDeque<TrackPoint>,
    last_batch_full: bool,
    last_seen_id: Option<i64>,
    batches_fetched: usize,
}

impl<S: PointSource, F: PointFactory> PointIterator<S, F> {
    /// Create an iterator over `track_id`.
    ///
    /// `start_id` of `None` starts at the first point (ascending) or the last
    /// point (descending); otherwise the scan starts at that id, inclusive.
    /// A missing factory or a zero batch size is rejected before the source is
    /// touched.
    pub fn new(
        source: S,
        track_id: i64,
        start_id: Option<i64>,
        descending: bool,
        factory: Option<F>,
        batch_size: usize,
    ) -> Result<Self> {
        let factory = factory.ok_or_invalid("point factory is required")?;
        if batch_size == 0 {
            return Err(TrackStoreError::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            source,
            factory,
            track_id,
            start_id,
            descending,
            batch_size,
            state: IteratorState::NotStarted,
            buffer: VecDeque::new(),
            last_batch_full: false,
            last_seen_id: None,
            batches_fetched: 0,
        })
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn track_id(&self) -> i64 {
        self.track_id
    }

    /// Id of the point most recently returned by `next_point()`.
    pub fn current_id(&self) -> Option<i64> {
        self.last_seen_id
    }

    /// Number of range queries issued so far.
    pub fn batches_fetched(&self) -> usize {
        self.batches_fetched
    }

    /// Whether another point is available. Never changes the position, but
    /// may fetch the next batch.
    pub fn has_next(&mut self) -> Result<bool> {
        match self.state {
            IteratorState::Exhausted | IteratorState::Closed => Ok(false),
            IteratorState::NotStarted => self.fetch_batch(),
            IteratorState::InBatch => {
                if !self.buffer.is_empty() {
                    Ok(true)
                } else if self.last_batch_full {
                    self.fetch_batch()
                } else {
                    self.finish(IteratorState::Exhausted);
                    Ok(false)
                }
            }
        }
    }

    /// Advance and materialize the next point.
    ///
    /// Calling this after the scan has ended (or after `close()`) is a
    /// protocol violation and returns `IteratorExhausted`.
    pub fn next_point(&mut self) -> Result<F::Output> {
        if !self.has_next()? {
            return Err(TrackStoreError::IteratorExhausted);
        }
        let point = self
            .buffer
            .pop_front()
            .ok_or(TrackStoreError::IteratorExhausted)?;
        self.last_seen_id = Some(point.id);
        Ok(self.factory.materialize(point))
    }

    /// Release the current batch and stop issuing queries.
    pub fn close(&mut self) {
        if self.state != IteratorState::Closed {
            self.finish(IteratorState::Closed);
        }
    }

    /// Window of the next batch: the inclusive start before anything was
    /// seen, afterwards one past the last seen id.
    fn next_query(&self) -> PointQuery {
        let query = PointQuery::new(self.track_id, self.batch_size).descending(self.descending);
        let bound = match self.last_seen_id {
            Some(last) if self.descending => Some(last - 1),
            Some(last) => Some(last + 1),
            None => self.start_id,
        };
        match bound {
            None => query,
            Some(max_id) if self.descending => query.max_id(max_id),
            Some(min_id) => query.min_id(min_id),
        }
    }

    fn fetch_batch(&mut self) -> Result<bool> {
        let query = self.next_query();
        let batch = match self.source.point_range(&query) {
            Ok(batch) => batch,
            Err(e) => {
                self.finish(IteratorState::Closed);
                return Err(e);
            }
        };
        self.batches_fetched += 1;
        self.last_batch_full = batch.len() >= self.batch_size;
        trace!(
            "[PointIterator] track {} batch {}: {} points",
            self.track_id,
            self.batches_fetched,
            batch.len()
        );

        if batch.is_empty() {
            self.finish(IteratorState::Exhausted);
            return Ok(false);
        }
        self.buffer = VecDeque::from(batch);
        self.state = IteratorState::InBatch;
        Ok(true)
    }

    fn finish(&mut self, state: IteratorState) {
        self.buffer = VecDeque::new();
        self.last_batch_full = false;
        self.state = state;
        debug!(
            "[PointIterator] track {} {:?} after {} batches",
            self.track_id, state, self.batches_fetched
        );
    }
}

impl<S: PointSource, F: PointFactory> Iterator for PointIterator<S, F> {
    type Item = Result<F::Output>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_point()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<S: PointSource, F: PointFactory> FusedIterator for PointIterator<S, F> {}

impl TrackDb {
    /// Iterate a track's points using the configured batch size.
    pub fn point_iterator<F: PointFactory>(
        &self,
        track_id: i64,
        start_id: Option<i64>,
        descending: bool,
        factory: Option<F>,
    ) -> Result<PointIterator<&TrackDb, F>> {
        PointIterator::new(
            self,
            track_id,
            start_id,
            descending,
            factory,
            self.config().batch_size,
        )
    }

    /// Iterate a track's points as fresh records.
    pub fn points(
        &self,
        track_id: i64,
        start_id: Option<i64>,
        descending: bool,
    ) -> Result<PointIterator<&TrackDb, NewPoint>> {
        self.point_iterator(track_id, start_id, descending, Some(NewPoint))
    }
}

//! Log record pool.
//!
//! Records are recycled through per-kind free lists. A [`PooledRecord`] owns
//! its record exclusively: moving it into the dispatch queue hands
//! ownership to the worker, and the record only returns to the pool when
//! the worker drops it after the write.

use crate::record::{LogKind, LogRecord};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of idle records kept per kind.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Counters describing pool usage.
#[derive(Debug, Default)]
pub struct PoolStats {
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

/// A point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    /// Records created because the free list was empty.
    pub allocated: u64,
    /// Records handed out from the free list.
    pub reused: u64,
    /// Records returned to the free list.
    pub released: u64,
    /// Records dropped because the free list was full.
    pub discarded: u64,
}

/// Thread-safe pool of [`LogRecord`]s.
#[derive(Debug)]
pub struct RecordPool {
    free: [Mutex<Vec<LogRecord>>; 3],
    max_idle: usize,
    stats: PoolStats,
}

impl RecordPool {
    /// Creates a pool keeping at most `max_idle` idle records per kind.
    #[must_use]
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            free: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            max_idle,
            stats: PoolStats::default(),
        })
    }

    /// Takes a cleared record of the given kind.
    pub fn acquire(self: &Arc<Self>, kind: LogKind) -> PooledRecord {
        let recycled = self.free[kind.slot()].lock().pop();
        let mut record = if let Some(record) = recycled {
            self.stats.reused.fetch_add(1, Ordering::Relaxed);
            record
        } else {
            self.stats.allocated.fetch_add(1, Ordering::Relaxed);
            LogRecord::default()
        };
        record.kind = kind;
        PooledRecord {
            record,
            pool: Arc::clone(self),
        }
    }

    fn put_back(&self, mut record: LogRecord) {
        record.reset();
        let mut free = self.free[record.kind.slot()].lock();
        if free.len() < self.max_idle {
            free.push(record);
            self.stats.released.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of idle records of `kind`.
    #[must_use]
    pub fn idle(&self, kind: LogKind) -> usize {
        self.free[kind.slot()].lock().len()
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            allocated: self.stats.allocated.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A record on loan from a [`RecordPool`].
///
/// Returned to the pool when released or dropped.
#[derive(Debug)]
pub struct PooledRecord {
    record: LogRecord,
    pool: Arc<RecordPool>,
}

impl PooledRecord {
    /// Returns the record to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledRecord {
    type Target = LogRecord;

    fn deref(&self) -> &LogRecord {
        &self.record
    }
}

impl DerefMut for PooledRecord {
    fn deref_mut(&mut self) -> &mut LogRecord {
        &mut self.record
    }
}

impl Drop for PooledRecord {
    fn drop(&mut self) {
        let record = std::mem::take(&mut self.record);
        self.pool.put_back(record);
    }
}

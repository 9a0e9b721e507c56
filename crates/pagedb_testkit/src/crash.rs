//! Crash simulation for PageDB.
//!
//! [`CrashStore`] wraps a real store and fails writes on demand. A failed
//! batch is dropped whole, exactly as if the process died before the
//! store made it durable, so tests can check that every multi-row change
//! (a commit with its objects, a download batch with its cursor) is
//! atomic.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pagedb_testkit::crash::CrashStore;
//!
//! let store = CrashStore::new(Arc::new(InMemoryStore::new()));
//! store.crash_at(CrashPoint::NextWrite);
//! // ... operation fails, store holds the state from before it
//! ```

use pagedb_storage::{KvStore, StorageError, StorageResult, WriteBatch};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// When a [`CrashStore`] stops accepting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The next write fails.
    NextWrite,
    /// The given number of writes succeed, then writes fail.
    AfterWrites(usize),
}

/// A store whose writes fail once armed.
///
/// Reads always reach the inner store. Once a write has failed every
/// later write fails too, until [`CrashStore::recover`] is called.
pub struct CrashStore {
    inner: Arc<dyn KvStore>,
    remaining: AtomicUsize,
    armed: AtomicBool,
    crashed: AtomicBool,
    writes: AtomicUsize,
}

impl std::fmt::Debug for CrashStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashStore")
            .field("armed", &self.armed.load(Ordering::SeqCst))
            .field("crashed", &self.crashed.load(Ordering::SeqCst))
            .field("writes", &self.writes.load(Ordering::SeqCst))
            .finish()
    }
}

impl CrashStore {
    /// Wraps `inner`. Writes pass through until armed.
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(0),
            armed: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Arms the store to crash at `point`.
    pub fn crash_at(&self, point: CrashPoint) {
        let remaining = match point {
            CrashPoint::NextWrite => 0,
            CrashPoint::AfterWrites(n) => n,
        };
        self.remaining.store(remaining, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the store; writes succeed again.
    pub fn recover(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns true once a write has been dropped.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the number of writes that reached the inner store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        if self.crashed.load(Ordering::SeqCst) {
            return true;
        }
        if !self.armed.load(Ordering::SeqCst) {
            return false;
        }
        let passed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !passed {
            self.crashed.store(true, Ordering::SeqCst);
        }
        !passed
    }
}

impl KvStore for CrashStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.should_fail() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated crash",
            )));
        }
        self.inner.write(batch)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_storage::InMemoryStore;

    fn put(store: &CrashStore, key: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), b"v".to_vec());
        store.write(batch)
    }

    #[test]
    fn passes_writes_until_armed() {
        let store = CrashStore::new(Arc::new(InMemoryStore::new()));
        put(&store, b"a").unwrap();
        assert_eq!(store.writes(), 1);
        assert!(store.get(b"a").unwrap().is_some());
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let store = CrashStore::new(Arc::new(InMemoryStore::new()));
        store.crash_at(CrashPoint::NextWrite);
        assert!(put(&store, b"a").is_err());
        assert!(store.has_crashed());
        assert!(store.get(b"a").unwrap().is_none());
    }

    #[test]
    fn crash_after_writes_then_recover() {
        let store = CrashStore::new(Arc::new(InMemoryStore::new()));
        store.crash_at(CrashPoint::AfterWrites(2));
        put(&store, b"a").unwrap();
        put(&store, b"b").unwrap();
        assert!(put(&store, b"c").is_err());
        assert!(put(&store, b"d").is_err());

        store.recover();
        put(&store, b"e").unwrap();
        assert_eq!(store.writes(), 3);
    }
}

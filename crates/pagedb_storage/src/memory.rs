//! In-memory ordered store for testing.

use crate::backend::KvStore;
use crate::batch::WriteBatch;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory ordered store.
///
/// This store keeps all rows in a `BTreeMap` and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral pages that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads. Batches are
/// applied under a single write lock, so readers never observe half a batch.
///
/// # Example
///
/// ```rust
/// use pagedb_storage::{InMemoryStore, KvStore, WriteBatch};
///
/// let store = InMemoryStore::new();
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v".to_vec());
/// store.write(batch).unwrap();
/// assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing rows.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_rows(rows: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            rows: RwLock::new(rows),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a copy of every row.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.rows.read().clone()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Marks the store closed; further operations fail with [`StorageError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.rows.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        let rows = self.rows.read();
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        self.check_open()?;
        batch.apply_to(&mut self.rows.write());
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable
        self.check_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn put(store: &InMemoryStore, key: &[u8], value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        store.write(batch).unwrap();
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn memory_put_then_get() {
        let store = InMemoryStore::new();
        put(&store, b"hello", b"world");
        assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
        assert!(store.contains(b"hello").unwrap());
    }

    #[test]
    fn memory_scan_prefix_is_ordered_and_bounded() {
        let store = InMemoryStore::new();
        put(&store, b"a/2", b"2");
        put(&store, b"a/1", b"1");
        put(&store, b"a0", b"outside");
        put(&store, b"b/1", b"outside");

        let rows = store.scan_prefix(b"a/").unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a/1".as_slice(), b"a/2".as_slice()]);
    }

    #[test]
    fn memory_empty_prefix_scans_everything() {
        let store = InMemoryStore::new();
        put(&store, b"x", b"1");
        put(&store, b"y", b"2");
        assert_eq!(store.scan_keys(b"").unwrap().len(), 2);
    }

    #[test]
    fn memory_delete_prefix() {
        let store = InMemoryStore::new();
        put(&store, b"p/1", b"1");
        put(&store, b"p/2", b"2");
        put(&store, b"q/1", b"3");

        let mut batch = WriteBatch::new();
        batch.delete_prefix(b"p/".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains(b"q/1").unwrap());
    }

    #[test]
    fn memory_closed_rejects_operations() {
        let store = InMemoryStore::new();
        store.close();
        assert!(matches!(store.get(b"k"), Err(StorageError::Closed)));
        assert!(matches!(
            store.write(WriteBatch::new()),
            Err(StorageError::Closed)
        ));
    }

    proptest! {
        #[test]
        fn memory_scan_prefix_matches_filter(
            keys in prop::collection::vec(prop::collection::vec(0u8..4, 0..4), 0..32),
            prefix in prop::collection::vec(0u8..4, 0..3),
        ) {
            let store = InMemoryStore::new();
            let mut batch = WriteBatch::new();
            for key in &keys {
                batch.put(key.clone(), b"v".to_vec());
            }
            store.write(batch).unwrap();

            let mut expected: Vec<Vec<u8>> = keys
                .iter()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            expected.sort();
            expected.dedup();

            prop_assert_eq!(store.scan_keys(&prefix).unwrap(), expected);
        }
    }
}

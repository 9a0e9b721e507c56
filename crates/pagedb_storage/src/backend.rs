//! Ordered key-value store trait definition.

use crate::batch::WriteBatch;
use crate::error::StorageResult;

/// A local ordered key-value store.
///
/// Stores are **opaque byte maps**. PageDB owns all key layout
/// interpretation - stores do not know about pages, objects or commits.
///
/// # Invariants
///
/// - `write` applies the whole batch or nothing
/// - `scan_prefix` returns rows sorted by key, bytewise
/// - Once `write` returns `Ok`, subsequent reads observe the batch
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreadable.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreadable.
    fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every row whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreadable.
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns every key that starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreadable.
    fn scan_keys(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Atomically applies a batch of writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. In that
    /// case none of its operations are visible.
    fn write(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Forces all previously written batches to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;
}

//! File-based ordered store backed by [`redb`](https://docs.rs/redb).
//!
//! The store directory looks like this:
//!
//! ```text
//! <store_path>/
//! └─ pages.redb    # redb database holding one byte-keyed table
//! ```
//!
//! Every [`WriteBatch`] runs in a single redb write transaction, so a batch
//! is either fully present or absent after a crash. Prefix scans are range
//! reads over the table, which redb keeps sorted bytewise.

use crate::backend::KvStore;
use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::registry::PathGuard;
use parking_lot::RwLock;
use redb::{Database, DatabaseError, Durability, ReadableTable, TableDefinition, WriteTransaction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DB_FILE: &str = "pages.redb";

const ROWS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("rows");

fn engine(err: impl Into<redb::Error>) -> StorageError {
    StorageError::Engine(err.into())
}

/// Options for opening a [`FileStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create the directory if it does not exist.
    pub create_if_missing: bool,
    /// Make every batch durable before `write` returns.
    pub sync_on_write: bool,
}

impl StoreOptions {
    /// Creates the default options (create if missing, sync on write).
    #[must_use]
    pub fn new() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
        }
    }

    /// Sets whether a missing directory is created.
    #[must_use]
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Sets whether every batch is synced to disk before returning.
    #[must_use]
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A persistent ordered store on top of a redb database.
///
/// # Durability
///
/// - With `sync_on_write` (the default) every batch commits with
///   [`Durability::Immediate`]
/// - Otherwise batches commit with [`Durability::Eventual`] and
///   [`KvStore::sync`] forces them out
///
/// # Ownership
///
/// Opening takes a process-wide [`PathGuard`], and redb holds a file lock on
/// the database for other processes. Opening the same path twice fails.
///
/// # Example
///
/// ```no_run
/// use pagedb_storage::{FileStore, KvStore, StoreOptions, WriteBatch};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("pages"), StoreOptions::default()).unwrap();
/// let mut batch = WriteBatch::new();
/// batch.put(b"k".to_vec(), b"v".to_vec());
/// store.write(batch).unwrap();
/// ```
pub struct FileStore {
    path: PathBuf,
    options: StoreOptions,
    // Write-locked only by `compact`, which needs exclusive access.
    db: RwLock<Database>,
    _guard: PathGuard,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

impl FileStore {
    /// Opens or creates a store at the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or database doesn't exist and `create_if_missing` is false
    /// - The path is already open in this process (`PathInUse`)
    /// - Another process has the database open (`Locked`)
    /// - The database cannot be opened
    pub fn open(path: &Path, options: StoreOptions) -> StorageResult<Self> {
        if !path.exists() {
            if options.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::NotFound(path.to_path_buf()));
            }
        }

        let guard = PathGuard::acquire(path)?;

        let db_path = path.join(DB_FILE);
        if !db_path.exists() && !options.create_if_missing {
            return Err(StorageError::NotFound(db_path));
        }
        let db = match Database::create(&db_path) {
            Ok(db) => db,
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                return Err(StorageError::Locked(path.to_path_buf()))
            }
            Err(err) => return Err(engine(err)),
        };

        // The table must exist before the first read transaction opens it
        let txn = db.begin_write().map_err(engine)?;
        txn.open_table(ROWS).map_err(engine)?;
        txn.commit().map_err(engine)?;

        info!(path = %path.display(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            options,
            db: RwLock::new(db),
            _guard: guard,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the size of the database file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn file_size(&self) -> StorageResult<u64> {
        Ok(fs::metadata(self.path.join(DB_FILE))?.len())
    }

    /// Runs redb's compaction, releasing free pages back to the file system.
    ///
    /// Returns true if the database file was rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if compaction fails.
    pub fn compact(&self) -> StorageResult<bool> {
        let mut db = self.db.write();
        let compacted = db.compact().map_err(engine)?;
        debug!(path = %self.path.display(), compacted, "compacted file store");
        Ok(compacted)
    }

    fn begin_write(&self, db: &Database) -> StorageResult<WriteTransaction> {
        let mut txn = db.begin_write().map_err(engine)?;
        if !self.options.sync_on_write {
            txn.set_durability(Durability::Eventual);
        }
        Ok(txn)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let txn = db.begin_read().map_err(engine)?;
        let table = txn.open_table(ROWS).map_err(engine)?;
        let value = table.get(key).map_err(engine)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db.read();
        let txn = db.begin_read().map_err(engine)?;
        let table = txn.open_table(ROWS).map_err(engine)?;

        let mut rows = Vec::new();
        for item in table.range(prefix..).map_err(engine)? {
            let (key, value) = item.map_err(engine)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            rows.push((key.value().to_vec(), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let db = self.db.read();
        let txn = self.begin_write(&db)?;
        {
            let mut table = txn.open_table(ROWS).map_err(engine)?;
            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(engine)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(engine)?;
                    }
                    BatchOp::DeletePrefix { prefix } => {
                        let mut doomed = Vec::new();
                        for item in table.range(prefix.as_slice()..).map_err(engine)? {
                            let (key, _) = item.map_err(engine)?;
                            if !key.value().starts_with(prefix) {
                                break;
                            }
                            doomed.push(key.value().to_vec());
                        }
                        for key in doomed {
                            table.remove(key.as_slice()).map_err(engine)?;
                        }
                    }
                }
            }
        }
        // Dropping an uncommitted transaction on any error above aborts it
        txn.commit().map_err(engine)?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        // An immediate commit also persists every earlier eventual commit
        let db = self.db.read();
        let mut txn = db.begin_write().map_err(engine)?;
        txn.set_durability(Durability::Immediate);
        txn.commit().map_err(engine)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(store: &FileStore, key: &[u8], value: &[u8]) {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        store.write(batch).unwrap();
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileStore::open(&path, StoreOptions::default()).unwrap();
        assert!(path.join(DB_FILE).exists());
        assert!(store.file_size().unwrap() > 0);
        assert!(store.scan_prefix(b"").unwrap().is_empty());
    }

    #[test]
    fn file_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");

        let result = FileStore::open(&path, StoreOptions::default().create_if_missing(false));
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        // An existing directory without a database is missing too
        let result = FileStore::open(dir.path(), StoreOptions::default().create_if_missing(false));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        {
            let store = FileStore::open(&path, StoreOptions::default()).unwrap();
            put(&store, b"a", b"1");
            put(&store, b"b", b"2");
            let mut batch = WriteBatch::new();
            batch.delete(b"a".to_vec());
            store.write(batch).unwrap();
        }

        let store = FileStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn file_scan_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();
        put(&store, b"p/2", b"two");
        put(&store, b"q/1", b"other");
        put(&store, b"p/1", b"one");
        put(&store, b"p", b"bare");

        let rows = store.scan_prefix(b"p/").unwrap();
        assert_eq!(
            rows,
            vec![
                (b"p/1".to_vec(), b"one".to_vec()),
                (b"p/2".to_vec(), b"two".to_vec()),
            ]
        );
        assert_eq!(store.scan_keys(b"").unwrap().len(), 4);
    }

    #[test]
    fn file_batch_applies_ops_in_order() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), StoreOptions::default()).unwrap();
        put(&store, b"p/1", b"old");
        put(&store, b"p/2", b"old");
        put(&store, b"q/1", b"keep");

        let mut batch = WriteBatch::new();
        batch.delete_prefix(b"p/".to_vec());
        batch.put(b"p/2".to_vec(), b"new".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"p/1").unwrap(), None);
        assert_eq!(store.get(b"p/2").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.get(b"q/1").unwrap(), Some(b"keep".to_vec()));
    }

    #[test]
    fn file_double_open_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let _store = FileStore::open(&path, StoreOptions::default()).unwrap();
        let second = FileStore::open(&path, StoreOptions::default());
        assert!(matches!(second, Err(StorageError::PathInUse(_))));
    }

    #[test]
    fn file_reopen_after_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        drop(FileStore::open(&path, StoreOptions::default()).unwrap());
        assert!(FileStore::open(&path, StoreOptions::default()).is_ok());
    }

    #[test]
    fn file_eventual_writes_survive_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        {
            let options = StoreOptions::default().sync_on_write(false);
            let store = FileStore::open(&path, options).unwrap();
            put(&store, b"lazy", b"value");
            store.sync().unwrap();
        }

        let store = FileStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.get(b"lazy").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn file_compact_keeps_live_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileStore::open(&path, StoreOptions::default()).unwrap();
        for i in 0..20u8 {
            put(&store, b"churn", &[i; 4096]);
        }
        put(&store, b"stable", b"value");

        store.compact().unwrap();
        assert_eq!(store.get(b"churn").unwrap(), Some(vec![19u8; 4096]));

        drop(store);
        let store = FileStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.get(b"stable").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get(b"churn").unwrap(), Some(vec![19u8; 4096]));
    }
}

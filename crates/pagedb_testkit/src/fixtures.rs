//! Test fixtures and page helpers.
//!
//! A [`TestPage`] owns its store and a [`ManualClock`], so commit
//! timestamps are deterministic and several "devices" can share one page
//! id without sharing storage.

use pagedb_core::{
    Commit, KeyPriority, ManualClock, MergePolicy, Page, PageId, PageOptions, ValueLookup,
};
use pagedb_storage::{FileStore, InMemoryStore, KvStore, StoreOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Clock reading every fixture starts from.
pub const START_MILLIS: u64 = 1_000;

/// A test page with its own store and clock.
pub struct TestPage {
    /// The page instance.
    pub page: Arc<Page>,
    /// The store the page lives in.
    pub store: Arc<dyn KvStore>,
    /// The clock stamping local commits.
    pub clock: Arc<ManualClock>,
    policy: MergePolicy,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestPage {
    /// Creates a new page in memory.
    pub fn memory() -> Self {
        Self::device(PageId::new())
    }

    /// Opens `page` on a fresh in-memory store, as another device would.
    pub fn device(page: PageId) -> Self {
        Self::device_with_policy(page, MergePolicy::default())
    }

    /// Like [`Self::device`], merging with `policy`.
    pub fn device_with_policy(page: PageId, policy: MergePolicy) -> Self {
        Self::on_store(Arc::new(InMemoryStore::new()), page, policy)
    }

    /// Opens `page` on `store`.
    pub fn on_store(store: Arc<dyn KvStore>, page: PageId, policy: MergePolicy) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let page = open(store.clone(), page, policy.clone(), clock.clone());
        Self {
            page,
            store,
            clock,
            policy,
            _temp_dir: None,
        }
    }

    /// Creates a new page in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store: Arc<dyn KvStore> = Arc::new(
            FileStore::open(temp_dir.path(), StoreOptions::default())
                .expect("Failed to open file store"),
        );
        let mut fixture = Self::on_store(store, PageId::new(), MergePolicy::default());
        fixture._temp_dir = Some(temp_dir);
        fixture
    }

    /// Returns a shared handle to the page.
    pub fn handle(&self) -> Arc<Page> {
        self.page.clone()
    }

    /// Re-opens the page from its store, dropping in-memory state.
    pub fn reopen(&mut self) {
        self.page = open(
            self.store.clone(),
            *self.page.id(),
            self.policy.clone(),
            self.clock.clone(),
        );
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.clock.advance(millis);
    }
}

impl std::ops::Deref for TestPage {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

fn open(
    store: Arc<dyn KvStore>,
    id: PageId,
    policy: MergePolicy,
    clock: Arc<ManualClock>,
) -> Arc<Page> {
    let options = PageOptions::new()
        .with_merge_policy(policy)
        .with_clock(clock);
    Arc::new(Page::open(store, id, options).expect("Failed to open page"))
}

/// Commits `key = value` and returns the new commit.
pub fn write(page: &Page, key: &str, value: &[u8]) -> Commit {
    write_with_priority(page, key, value, KeyPriority::Eager)
}

/// Commits `key = value` with the given priority.
pub fn write_with_priority(page: &Page, key: &str, value: &[u8], priority: KeyPriority) -> Commit {
    let mut journal = page.begin();
    journal
        .put_with_priority(key, value, priority)
        .expect("Failed to stage put");
    journal
        .commit()
        .expect("Failed to commit")
        .expect("Write changed nothing")
}

/// Commits the deletion of `key`.
pub fn delete(page: &Page, key: &str) -> Commit {
    let mut journal = page.begin();
    journal.delete(key);
    journal
        .commit()
        .expect("Failed to commit")
        .expect("Delete changed nothing")
}

/// Reads `key` at the current head, `None` if absent or not local.
pub fn read(page: &Page, key: &str) -> Option<Vec<u8>> {
    match page.get(key.as_bytes()).expect("Failed to read") {
        ValueLookup::Found(bytes) => Some(bytes.to_vec()),
        ValueLookup::Missing | ValueLookup::NotLocal(_) => None,
    }
}

/// Returns every locally readable key and value at the current head.
pub fn contents(page: &Page) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let entries = page.entries().expect("Failed to read entries");
    entries
        .keys()
        .filter_map(|key| {
            page.get(key)
                .expect("Failed to read")
                .found()
                .map(|value| (key.clone(), value.to_vec()))
        })
        .collect()
}

/// Installs a test log subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_share_the_page_id_not_the_store() {
        let a = TestPage::memory();
        let b = TestPage::device(*a.id());
        write(&a, "k", b"v");

        assert_eq!(a.id(), b.id());
        assert_eq!(read(&a, "k"), Some(b"v".to_vec()));
        assert_eq!(read(&b, "k"), None);
    }

    #[test]
    fn reopen_keeps_committed_state() {
        let mut fixture = TestPage::memory();
        let head = write(&fixture, "k", b"v");
        fixture.reopen();
        assert_eq!(fixture.current_head().unwrap(), head);
        assert_eq!(contents(&fixture).len(), 1);
    }

    #[test]
    fn file_fixture_writes() {
        let fixture = TestPage::file();
        write(&fixture, "a", b"1");
        delete(&fixture, "a");
        assert!(contents(&fixture).is_empty());
    }

    #[test]
    fn clock_stamps_commits() {
        let fixture = TestPage::memory();
        fixture.advance(5);
        let commit = write(&fixture, "k", b"v");
        assert_eq!(commit.timestamp(), START_MILLIS + 5);
    }
}

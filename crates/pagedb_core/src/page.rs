//! Pages: the versioned key-value documents.
//!
//! A [`Page`] ties together the object store, the commit graph and the
//! reference rows of one page id. All mutations of a page run under its
//! write lock, so local journal commits, remote commit application and
//! merges are serialized.
//!
//! Reference rows always materialize the page's *current head*: the
//! latest head by timestamp (then commit id). Reads go through them.

use crate::cbor;
use crate::change_feed::{ChangeFeed, ChangeOrigin, PageChange};
use crate::commit::{Commit, CommitGraph, CommitId};
use crate::entries::{Entry, EntryChange, EntrySet};
use crate::error::{CoreError, CoreResult};
use crate::ingest::{stage_ingest, DataSource};
use crate::keys;
use crate::merge::MergePolicy;
use crate::object::{ObjectIdentifier, ObjectStore};
use crate::types::{Clock, KeyPriority, PageId, SystemClock};
use bytes::Bytes;
use pagedb_storage::{KvStore, WriteBatch};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PageMetadata {
    format_version: u32,
}

/// Options for opening a [`Page`].
#[derive(Clone)]
pub struct PageOptions {
    /// How divergent heads are merged.
    pub merge_policy: MergePolicy,
    /// Source of commit timestamps.
    pub clock: Arc<dyn Clock>,
}

impl PageOptions {
    /// Creates default options: last-one-wins merging and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            merge_policy: MergePolicy::LastOneWins,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the merge policy.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for PageOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageOptions")
            .field("merge_policy", &self.merge_policy)
            .finish()
    }
}

/// Result of reading one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueLookup {
    /// The value is stored locally.
    Found(Bytes),
    /// No entry with this key at the current head.
    Missing,
    /// The entry exists but its (lazy) value has not been fetched.
    NotLocal(ObjectIdentifier),
}

impl ValueLookup {
    /// Returns the value if it was found locally.
    #[must_use]
    pub fn found(self) -> Option<Bytes> {
        match self {
            ValueLookup::Found(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// A consistent view of a page at one commit.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// The head the snapshot was taken at.
    pub commit: Commit,
    /// All entries at that head.
    pub entries: EntrySet,
}

/// A versioned key-value page.
pub struct Page {
    id: PageId,
    store: Arc<dyn KvStore>,
    objects: ObjectStore,
    graph: CommitGraph,
    clock: Arc<dyn Clock>,
    policy: RwLock<MergePolicy>,
    write_lock: Mutex<()>,
    feed: ChangeFeed,
    local_commits: Notify,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("id", &self.id).finish()
    }
}

impl Page {
    /// Opens `id` in `store`, creating it (metadata row and shared root
    /// commit) if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn open(store: Arc<dyn KvStore>, id: PageId, options: PageOptions) -> CoreResult<Self> {
        let graph = CommitGraph::new(store.clone(), id);
        let metadata_key = keys::metadata_row_key(&id);
        if !store.contains(&metadata_key)? {
            let mut batch = WriteBatch::new();
            batch.put(
                metadata_key,
                cbor::to_vec(&PageMetadata {
                    format_version: FORMAT_VERSION,
                })?,
            );
            graph.stage_root(&mut batch)?;
            store.write(batch)?;
            info!(page = %id, "created page");
        } else {
            debug!(page = %id, "opened page");
        }

        Ok(Self {
            id,
            objects: ObjectStore::new(store.clone(), id),
            store,
            graph,
            clock: options.clock,
            policy: RwLock::new(options.merge_policy),
            write_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
            local_commits: Notify::new(),
        })
    }

    /// Returns true if `id` has been created in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn exists(store: &dyn KvStore, id: &PageId) -> CoreResult<bool> {
        Ok(store.contains(&keys::metadata_row_key(id))?)
    }

    /// Lists every page created in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn list_pages(store: &dyn KvStore) -> CoreResult<Vec<PageId>> {
        let mut pages = Vec::new();
        for row in store.scan_keys(keys::PAGE_ROOT)? {
            if let Some(page) = keys::page_id_from_row_key(&row) {
                if row == keys::metadata_row_key(&page) {
                    pages.push(page);
                }
            }
        }
        Ok(pages)
    }

    /// Deletes every row of `id` with a single prefix-range delete.
    ///
    /// Any open [`Page`] for `id` must be dropped first; the caller is also
    /// responsible for cancelling its synchronizer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn delete_page(store: &dyn KvStore, id: &PageId) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete_prefix(keys::page_prefix(id));
        store.write(batch)?;
        info!(page = %id, "deleted page");
        Ok(())
    }

    /// Returns the page id.
    #[must_use]
    pub fn id(&self) -> &PageId {
        &self.id
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Returns the page's object store.
    #[must_use]
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Returns the page's commit graph.
    #[must_use]
    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    /// Returns the current merge policy.
    #[must_use]
    pub fn merge_policy(&self) -> MergePolicy {
        self.policy.read().clone()
    }

    /// Replaces the merge policy.
    pub fn set_merge_policy(&self, policy: MergePolicy) {
        *self.policy.write() = policy;
    }

    /// Subscribes to changes of the current state.
    pub fn subscribe(&self) -> Receiver<PageChange> {
        self.feed.subscribe()
    }

    /// Returns retained changes after `cursor`.
    pub fn poll_changes(&self, cursor: u64, limit: usize) -> Vec<PageChange> {
        self.feed.poll(cursor, limit)
    }

    /// Signalled after every local commit or merge that needs uploading.
    #[must_use]
    pub fn local_commit_signal(&self) -> &Notify {
        &self.local_commits
    }

    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Starts a local transaction.
    #[must_use]
    pub fn begin(&self) -> Journal<'_> {
        Journal {
            page: self,
            batch: WriteBatch::new(),
            changes: BTreeMap::new(),
        }
    }

    /// Returns all heads, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a head cannot be loaded.
    pub fn heads(&self) -> CoreResult<Vec<Commit>> {
        self.graph.head_commits()
    }

    /// Returns the head reads are served from: the latest by timestamp,
    /// then commit id.
    ///
    /// # Errors
    ///
    /// Returns an error if the heads cannot be loaded.
    pub fn current_head(&self) -> CoreResult<Commit> {
        self.heads()?
            .pop()
            .ok_or_else(|| CoreError::invalid_operation("page has no head"))
    }

    /// Returns true if the page has exactly one head.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_converged(&self) -> CoreResult<bool> {
        Ok(self.graph.heads()?.len() == 1)
    }

    /// Reads the value of `key` at the current head.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage or decoding failures; an absent
    /// key or an unfetched value is reported through [`ValueLookup`].
    pub fn get(&self, key: &[u8]) -> CoreResult<ValueLookup> {
        let Some(entry) = self.objects.entry_reference(key)? else {
            return Ok(ValueLookup::Missing);
        };
        Ok(match self.objects.get(&entry.object)? {
            Some(bytes) => ValueLookup::Found(bytes),
            None => ValueLookup::NotLocal(entry.object),
        })
    }

    /// Returns the entry for `key` at the current head.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference row is unreadable.
    pub fn entry(&self, key: &[u8]) -> CoreResult<Option<Entry>> {
        self.objects.entry_reference(key)
    }

    /// Returns every entry at the current head.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference row is unreadable.
    pub fn entries(&self) -> CoreResult<EntrySet> {
        self.objects.entry_references()
    }

    /// Takes a consistent snapshot of the current head.
    ///
    /// # Errors
    ///
    /// Returns an error if the head or its entries cannot be loaded.
    pub fn snapshot(&self) -> CoreResult<PageSnapshot> {
        let _guard = self.lock_writes();
        let commit = self.current_head()?;
        let entries = self.entries()?;
        Ok(PageSnapshot { commit, entries })
    }

    /// Loads the entry set a commit points at.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingObject`] if the root object is not local.
    pub fn entry_set_at(&self, commit: &Commit) -> CoreResult<EntrySet> {
        let root = commit.root_object();
        let bytes = self
            .objects
            .get(root)?
            .ok_or(CoreError::MissingObject { id: *root })?;
        EntrySet::from_bytes(&bytes)
    }

    fn stage_references(&self, batch: &mut WriteBatch, changes: &[EntryChange]) -> CoreResult<()> {
        for change in changes {
            match &change.entry {
                Some(entry) => self.objects.stage_entry_reference(batch, &change.key, entry)?,
                None => self.objects.stage_delete_entry_reference(batch, &change.key),
            }
        }
        Ok(())
    }

    fn commit_journal(
        &self,
        mut batch: WriteBatch,
        changes: BTreeMap<Vec<u8>, Option<Entry>>,
    ) -> CoreResult<Option<Commit>> {
        let _guard = self.lock_writes();

        // A referenced object may have been collected since it was staged
        for entry in changes.values().flatten() {
            if entry.priority == KeyPriority::Eager
                && !self.objects.is_staged_or_stored(&batch, &entry.object)?
            {
                return Err(CoreError::MissingObject { id: entry.object });
            }
        }

        let head = self.current_head()?;
        let base = self.entry_set_at(&head)?;

        let changes: Vec<EntryChange> = changes
            .into_iter()
            .map(|(key, entry)| EntryChange { key, entry })
            .collect();
        let mut entries = base.clone();
        entries.apply(&changes);
        let effective = base.diff(&entries);
        if effective.is_empty() {
            debug!(page = %self.id, "journal commit changed nothing");
            return Ok(None);
        }

        let root = self.objects.stage_put(&mut batch, &entries.to_bytes()?)?;
        let timestamp = self.clock.now_millis().max(head.timestamp() + 1);
        let commit = self
            .graph
            .create_commit(&mut batch, vec![*head.id()], root, timestamp)?;
        batch.put(keys::unsynced_row_key(&self.id, commit.id()), Vec::new());
        self.stage_references(&mut batch, &effective)?;
        self.store.write(batch)?;

        debug!(page = %self.id, commit = %commit.id(), keys = effective.len(), "committed journal");
        self.feed.emit(*commit.id(), ChangeOrigin::Local, effective);
        self.local_commits.notify_one();
        Ok(Some(commit))
    }

    /// Creates a merge commit of two heads.
    ///
    /// Returns `Ok(None)` if either commit stopped being a head since the
    /// caller looked, in which case the caller should re-read the heads.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged set cannot be stored.
    pub fn commit_merge(
        &self,
        left: &Commit,
        right: &Commit,
        merged: &EntrySet,
    ) -> CoreResult<Option<Commit>> {
        let _guard = self.lock_writes();
        let heads = self.heads()?;
        if !heads.iter().any(|h| h.id() == left.id()) || !heads.iter().any(|h| h.id() == right.id()) {
            return Ok(None);
        }
        let before = heads
            .last()
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("page has no head"))?;

        let mut batch = WriteBatch::new();
        let root = self.objects.stage_put(&mut batch, &merged.to_bytes()?)?;
        let timestamp = left.timestamp().max(right.timestamp()) + 1;
        let commit = self.graph.create_commit(
            &mut batch,
            vec![*left.id(), *right.id()],
            root,
            timestamp,
        )?;
        batch.put(keys::unsynced_row_key(&self.id, commit.id()), Vec::new());

        let mut remaining: Vec<Commit> = heads
            .into_iter()
            .filter(|h| h.id() != left.id() && h.id() != right.id())
            .collect();
        remaining.push(commit.clone());
        let after = newest(remaining)?;

        let changes = if after.id() == before.id() {
            Vec::new()
        } else {
            let old = self.entries()?;
            let new = if after.id() == commit.id() {
                merged.clone()
            } else {
                self.entry_set_at(&after)?
            };
            old.diff(&new)
        };
        self.stage_references(&mut batch, &changes)?;
        self.store.write(batch)?;

        info!(page = %self.id, commit = %commit.id(), left = %left.id(), right = %right.id(), "merged heads");
        self.feed.emit(*after.id(), ChangeOrigin::Merge, changes);
        self.local_commits.notify_one();
        Ok(Some(commit))
    }

    /// Returns local commits not yet acknowledged by the remote log, in
    /// generation order.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit cannot be loaded.
    pub fn unsynced_commits(&self) -> CoreResult<Vec<Commit>> {
        let prefix = keys::unsynced_prefix(&self.id);
        let mut commits = Vec::new();
        for row in self.store.scan_keys(&prefix)? {
            if let Some(digest) = keys::digest_from_row_key(&prefix, &row) {
                commits.push(self.graph.require(&CommitId::from_bytes(digest))?);
            }
        }
        commits.sort_by_key(|c| (c.generation(), *c.id()));
        Ok(commits)
    }

    /// Clears the upload markers of acknowledged commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn mark_synced(&self, ids: &[CommitId]) -> CoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for id in ids {
            batch.delete(keys::unsynced_row_key(&self.id, id));
        }
        self.store.write(batch)?;
        Ok(())
    }

    /// Returns the locally stored objects `commit` references that none of
    /// its parents' entry sets do: its root plus new entry values.
    ///
    /// Lazy values that were never fetched are skipped; the remote log
    /// already holds them.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry set cannot be loaded.
    pub fn objects_introduced_by(&self, commit: &Commit) -> CoreResult<Vec<ObjectIdentifier>> {
        let mut inherited = HashSet::new();
        for parent in commit.parents() {
            let parent = self.graph.require(parent)?;
            inherited.insert(*parent.root_object());
            inherited.extend(self.entry_set_at(&parent)?.iter().map(|(_, e)| e.object));
        }

        let mut introduced = vec![*commit.root_object()];
        let mut seen = HashSet::from([*commit.root_object()]);
        for (_, entry) in &self.entry_set_at(commit)? {
            if inherited.contains(&entry.object) || !seen.insert(entry.object) {
                continue;
            }
            if self.objects.has_object(&entry.object)? {
                introduced.push(entry.object);
            }
        }
        Ok(introduced)
    }

    /// Stores an object downloaded from the remote log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HashMismatch`] if the content does not match.
    pub fn store_remote_object(&self, id: ObjectIdentifier, content: &[u8]) -> CoreResult<()> {
        self.objects.put_verified(id, content)
    }

    /// Returns the persisted remote log cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn sync_cursor(&self) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.store.get(&keys::sync_cursor_row_key(&self.id))?)
    }

    /// Inserts downloaded commits and advances the cursor in one atomic
    /// write.
    ///
    /// Root objects of commits that become the current head must already be
    /// stored. If anything fails nothing is written, so the cursor never
    /// moves past commits that were not applied.
    ///
    /// # Errors
    ///
    /// Returns content errors for malformed commits and
    /// [`CoreError::MissingObject`] if a needed root is absent.
    pub fn apply_remote_commits(
        &self,
        commits: Vec<Commit>,
        cursor: Option<&[u8]>,
    ) -> CoreResult<Vec<Commit>> {
        let _guard = self.lock_writes();
        let heads = self.heads()?;
        let before = newest(heads.clone())?;

        let mut batch = WriteBatch::new();
        let finalized = self.graph.stage_commits(&mut batch, commits)?;
        if let Some(cursor) = cursor {
            batch.put(keys::sync_cursor_row_key(&self.id), cursor.to_vec());
        }

        let superseded: HashSet<CommitId> = finalized
            .iter()
            .flat_map(|c| c.parents().iter().copied())
            .collect();
        let candidates: Vec<Commit> = heads
            .into_iter()
            .chain(finalized.iter().cloned())
            .filter(|c| !superseded.contains(c.id()))
            .collect();
        let after = newest(candidates)?;

        let changes = if after.id() == before.id() {
            Vec::new()
        } else {
            self.entries()?.diff(&self.entry_set_at(&after)?)
        };
        self.stage_references(&mut batch, &changes)?;
        if !batch.is_empty() {
            self.store.write(batch)?;
        }

        if !finalized.is_empty() {
            debug!(page = %self.id, finalized = finalized.len(), head = %after.id(), "applied remote commits");
        }
        self.feed.emit(*after.id(), ChangeOrigin::Sync, changes);
        Ok(finalized)
    }
}

fn newest(commits: Vec<Commit>) -> CoreResult<Commit> {
    commits
        .into_iter()
        .max_by_key(Commit::age_key)
        .ok_or_else(|| CoreError::invalid_operation("page has no head"))
}

/// A local transaction on a page.
///
/// Writes are buffered (values are hashed and staged, nothing touches the
/// store) until [`Journal::commit`], which applies them on top of the
/// page's current head in one atomic batch. Dropping the journal or calling
/// [`Journal::rollback`] discards everything.
pub struct Journal<'a> {
    page: &'a Page,
    batch: WriteBatch,
    changes: BTreeMap<Vec<u8>, Option<Entry>>,
}

impl fmt::Debug for Journal<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("page", self.page.id())
            .field("changes", &self.changes.len())
            .finish()
    }
}

impl Journal<'_> {
    /// Sets `key` to an eager value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: &[u8]) -> CoreResult<ObjectIdentifier> {
        self.put_with_priority(key, value, KeyPriority::Eager)
    }

    /// Sets `key` to a value with the given priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn put_with_priority(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: &[u8],
        priority: KeyPriority,
    ) -> CoreResult<ObjectIdentifier> {
        let id = ObjectIdentifier::of(value);
        self.page.objects.stage_put_carried(&mut self.batch, id, value)?;
        self.changes.insert(key.into(), Some(Entry::new(id, priority)));
        Ok(id)
    }

    /// Sets `key` to a value read from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if ingestion fails; the journal is unchanged then.
    pub async fn put_source(
        &mut self,
        key: impl Into<Vec<u8>>,
        source: DataSource,
        priority: KeyPriority,
    ) -> CoreResult<ObjectIdentifier> {
        let mut staged = WriteBatch::new();
        let id = stage_ingest(&self.page.objects, &mut staged, source).await?;
        self.batch.extend(staged);
        self.changes.insert(key.into(), Some(Entry::new(id, priority)));
        Ok(id)
    }

    /// Points `key` at an existing object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingObject`] for an eager entry whose object
    /// is not stored locally.
    pub fn put_reference(
        &mut self,
        key: impl Into<Vec<u8>>,
        id: ObjectIdentifier,
        priority: KeyPriority,
    ) -> CoreResult<()> {
        if priority == KeyPriority::Eager && !self.page.objects.is_staged_or_stored(&self.batch, &id)? {
            return Err(CoreError::MissingObject { id });
        }
        self.changes.insert(key.into(), Some(Entry::new(id, priority)));
        Ok(())
    }

    /// Deletes `key`.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.changes.insert(key.into(), None);
    }

    /// Returns the number of keys touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Commits on top of the current head.
    ///
    /// Returns `Ok(None)` if the writes leave the entries unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written; nothing is
    /// applied in that case.
    pub fn commit(self) -> CoreResult<Option<Commit>> {
        self.page.commit_journal(self.batch, self.changes)
    }

    /// Discards the journal.
    pub fn rollback(self) {
        debug!(page = %self.page.id(), changes = self.changes.len(), "rolled back journal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{collect_garbage, GcOptions};
    use crate::types::ManualClock;
    use pagedb_storage::InMemoryStore;

    fn open() -> (Arc<InMemoryStore>, Page) {
        let kv = Arc::new(InMemoryStore::new());
        let page = Page::open(
            kv.clone(),
            PageId::new(),
            PageOptions::new().with_clock(Arc::new(ManualClock::new(100))),
        )
        .unwrap();
        (kv, page)
    }

    #[test]
    fn new_page_has_root_head() {
        let (kv, page) = open();
        assert!(Page::exists(kv.as_ref(), page.id()).unwrap());
        assert_eq!(page.current_head().unwrap(), Commit::root().unwrap());
        assert!(page.entries().unwrap().is_empty());
        assert_eq!(Page::list_pages(kv.as_ref()).unwrap(), vec![*page.id()]);
    }

    #[test]
    fn journal_commit_is_readable() {
        let (_, page) = open();
        let mut journal = page.begin();
        journal.put("k", b"v1").unwrap();
        let commit = journal.commit().unwrap().unwrap();

        assert_eq!(page.current_head().unwrap().id(), commit.id());
        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Found(Bytes::from_static(b"v1")));
        assert_eq!(page.get(b"other").unwrap(), ValueLookup::Missing);
        assert_eq!(page.unsynced_commits().unwrap(), vec![commit]);
    }

    #[test]
    fn collected_orphan_survives_open_journal() {
        let (_, page) = open();
        let orphan = page.objects().put(b"v").unwrap();

        let mut journal = page.begin();
        journal.put("k", b"v").unwrap();
        let report = collect_garbage(&page, &GcOptions::new()).unwrap();
        assert_eq!(report.deleted, vec![*orphan.digest()]);

        let commit = journal.commit().unwrap().unwrap();
        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Found(Bytes::from_static(b"v")));
        assert!(page.objects_introduced_by(&commit).unwrap().contains(&orphan));
    }

    #[test]
    fn reference_to_collected_object_fails_commit() {
        let (_, page) = open();
        let orphan = page.objects().put(b"v").unwrap();

        let mut journal = page.begin();
        journal.put_reference("k", orphan, KeyPriority::Eager).unwrap();
        collect_garbage(&page, &GcOptions::new()).unwrap();

        let err = journal.commit().unwrap_err();
        assert!(matches!(err, CoreError::MissingObject { id } if id == orphan));
        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Missing);
    }

    #[test]
    fn rollback_leaves_no_objects() {
        let (kv, page) = open();
        let rows = kv.len();
        let mut journal = page.begin();
        let id = journal.put("k", b"never committed").unwrap();
        journal.rollback();

        assert_eq!(kv.len(), rows);
        assert!(!page.objects().has_object(&id).unwrap());
    }

    #[test]
    fn timestamps_strictly_increase() {
        let (_, page) = open();
        let mut last = 0;
        for i in 0..3u8 {
            let mut journal = page.begin();
            journal.put("k", &[i]).unwrap();
            let commit = journal.commit().unwrap().unwrap();
            assert!(commit.timestamp() > last);
            last = commit.timestamp();
        }
    }

    #[test]
    fn no_op_journal_creates_no_commit() {
        let (_, page) = open();
        let mut journal = page.begin();
        journal.put("k", b"v").unwrap();
        journal.commit().unwrap();

        let mut again = page.begin();
        again.put("k", b"v").unwrap();
        again.delete("absent");
        assert!(again.commit().unwrap().is_none());
    }

    #[test]
    fn delete_removes_reference() {
        let (_, page) = open();
        let mut journal = page.begin();
        journal.put("k", b"v").unwrap();
        journal.commit().unwrap();

        let mut journal = page.begin();
        journal.delete("k");
        journal.commit().unwrap();
        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Missing);
    }

    #[test]
    fn lazy_reference_reads_as_not_local() {
        let (_, page) = open();
        let remote = ObjectIdentifier::of(b"only on the server");
        let mut journal = page.begin();
        assert!(journal
            .put_reference("eager", remote, KeyPriority::Eager)
            .is_err());
        journal
            .put_reference("lazy", remote, KeyPriority::Lazy)
            .unwrap();
        journal.commit().unwrap();

        assert_eq!(page.get(b"lazy").unwrap(), ValueLookup::NotLocal(remote));
        page.store_remote_object(remote, b"only on the server").unwrap();
        assert!(page.get(b"lazy").unwrap().found().is_some());
    }

    #[test]
    fn change_feed_reports_local_commits() {
        let (_, page) = open();
        let rx = page.subscribe();
        let mut journal = page.begin();
        journal.put("a", b"1").unwrap();
        journal.put("b", b"2").unwrap();
        journal.commit().unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.origin, ChangeOrigin::Local);
        assert_eq!(change.changes.len(), 2);
    }

    #[test]
    fn objects_introduced_excludes_inherited_values() {
        let (_, page) = open();
        let mut journal = page.begin();
        let old = journal.put("a", b"1").unwrap();
        journal.commit().unwrap();

        let mut journal = page.begin();
        let new = journal.put("b", b"2").unwrap();
        let commit = journal.commit().unwrap().unwrap();

        let introduced = page.objects_introduced_by(&commit).unwrap();
        assert_eq!(introduced[0], *commit.root_object());
        assert!(introduced.contains(&new));
        assert!(!introduced.contains(&old));
    }

    #[test]
    fn remote_commits_move_references_and_cursor() {
        let (_, a) = open();
        let mut journal = a.begin();
        journal.put("k", b"from a").unwrap();
        let commit = journal.commit().unwrap().unwrap();

        let (_, b) = open();
        for id in a.objects_introduced_by(&commit).unwrap() {
            let bytes = a.objects().get(&id).unwrap().unwrap();
            b.store_remote_object(id, &bytes).unwrap();
        }
        let rx = b.subscribe();
        let finalized = b
            .apply_remote_commits(vec![commit.clone()], Some(b"cursor-1"))
            .unwrap();

        assert_eq!(finalized, vec![commit]);
        assert_eq!(b.sync_cursor().unwrap(), Some(b"cursor-1".to_vec()));
        assert_eq!(b.get(b"k").unwrap().found().unwrap().as_ref(), b"from a");
        assert_eq!(rx.try_recv().unwrap().origin, ChangeOrigin::Sync);
        assert!(b.unsynced_commits().unwrap().is_empty());
    }

    #[test]
    fn missing_root_blocks_cursor() {
        let (_, a) = open();
        let mut journal = a.begin();
        journal.put("k", b"v").unwrap();
        let commit = journal.commit().unwrap().unwrap();

        let (_, b) = open();
        let result = b.apply_remote_commits(vec![commit], Some(b"cursor"));
        assert!(matches!(result, Err(CoreError::MissingObject { .. })));
        assert_eq!(b.sync_cursor().unwrap(), None);
        assert_eq!(b.heads().unwrap().len(), 1);
    }

    #[test]
    fn delete_page_removes_every_row() {
        let (kv, page) = open();
        let mut journal = page.begin();
        journal.put("k", b"v").unwrap();
        journal.commit().unwrap();
        let id = *page.id();
        drop(page);

        Page::delete_page(kv.as_ref(), &id).unwrap();
        assert!(kv.is_empty());
        assert!(!Page::exists(kv.as_ref(), &id).unwrap());
    }
}

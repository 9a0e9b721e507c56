//! The remote cloud commit log.
//!
//! [`CloudLog`] abstracts the service a page synchronizes with, allowing
//! for different implementations (an RPC client, an HTTP gateway, the
//! in-process [`MemoryCloudLog`] for testing).

use async_trait::async_trait;
use bytes::Bytes;
use pagedb_core::{CommitId, ObjectIdentifier, PageId};
use pagedb_sync_protocol::{
    CommitPage, CommitRecord, CursorToken, RemoteError, RemoteErrorKind, RemoteResult, Signature,
    UploadBatch, WatchEvent, WatchNotification,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

/// Stream of events delivered by [`CloudLog::set_watcher`].
pub type WatchStream = mpsc::UnboundedReceiver<WatchEvent>;

/// A remote, append-only log of commit records plus an object store, one
/// per page.
#[async_trait]
pub trait CloudLog: Send + Sync {
    /// Appends commit records.
    ///
    /// A batch whose signature was already accepted is ignored. A batch
    /// made only of known commits fails with
    /// [`RemoteErrorKind::AlreadyExists`].
    async fn add_commits(&self, page: &PageId, batch: UploadBatch) -> RemoteResult<()>;

    /// Reads up to `limit` records after `cursor`.
    async fn get_commits(
        &self,
        page: &PageId,
        cursor: &CursorToken,
        limit: usize,
    ) -> RemoteResult<CommitPage>;

    /// Stores an object. Fails with [`RemoteErrorKind::AlreadyExists`] if
    /// it is already stored.
    async fn add_object(&self, page: &PageId, id: ObjectIdentifier, content: Bytes)
        -> RemoteResult<()>;

    /// Returns true if the object is stored.
    async fn has_object(&self, page: &PageId, id: ObjectIdentifier) -> RemoteResult<bool>;

    /// Reads an object. Fails with [`RemoteErrorKind::NotFound`] if absent.
    async fn get_object(&self, page: &PageId, id: ObjectIdentifier) -> RemoteResult<Bytes>;

    /// Opens a standing watch from `cursor`.
    ///
    /// Records already past the cursor are delivered first; the
    /// notification that reaches the end of the log has `caught_up` set.
    /// The stream ends with [`WatchEvent::Error`] or by closing.
    async fn set_watcher(&self, page: &PageId, cursor: CursorToken) -> RemoteResult<WatchStream>;
}

/// Remote calls, for targeting injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOp {
    /// [`CloudLog::add_commits`].
    AddCommits,
    /// [`CloudLog::get_commits`].
    GetCommits,
    /// [`CloudLog::add_object`].
    AddObject,
    /// [`CloudLog::has_object`].
    HasObject,
    /// [`CloudLog::get_object`].
    GetObject,
    /// [`CloudLog::set_watcher`].
    SetWatcher,
}

#[derive(Default)]
struct PageLog {
    records: Vec<CommitRecord>,
    ids: HashSet<CommitId>,
    signatures: HashSet<Signature>,
    objects: HashMap<ObjectIdentifier, Bytes>,
    watchers: Vec<mpsc::UnboundedSender<WatchEvent>>,
}

impl PageLog {
    fn notify(&mut self, event: &WatchEvent) {
        let event = over_wire(event);
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct Inner {
    pages: HashMap<PageId, PageLog>,
    faults: HashMap<CloudOp, VecDeque<RemoteError>>,
    lost_acks: usize,
    revoked: Option<String>,
    calls: HashMap<CloudOp, usize>,
}

impl Inner {
    fn enter(&mut self, op: CloudOp) -> RemoteResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(message) = &self.revoked {
            return Err(RemoteError::unauthorized(message.clone()));
        }
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-process [`CloudLog`] with fault injection.
///
/// Every message crosses the protocol's CBOR encoding, so the log only
/// ever sees what a real service would receive.
#[derive(Default)]
pub struct MemoryCloudLog {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryCloudLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCloudLog")
            .field("pages", &self.inner.lock().pages.len())
            .finish()
    }
}

impl MemoryCloudLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` fail with `error`. Faults queue up.
    pub fn fail_next(&self, op: CloudOp, error: RemoteError) {
        self.inner.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Makes the next `count` accepted uploads report a network failure
    /// after the records were stored, as if the acknowledgement was lost.
    pub fn lose_next_acks(&self, count: usize) {
        self.inner.lock().lost_acks += count;
    }

    /// Rejects every call as unauthorized until [`Self::restore_access`].
    ///
    /// Open watches receive a terminal error.
    pub fn revoke_access(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        let message = message.into();
        inner.revoked = Some(message.clone());
        let event = WatchEvent::Error(RemoteError::unauthorized(message));
        for log in inner.pages.values_mut() {
            log.notify(&event);
            log.watchers.clear();
        }
    }

    /// Accepts calls again.
    pub fn restore_access(&self) {
        self.inner.lock().revoked = None;
    }

    /// Ends every open watch of `page` with a network error.
    pub fn disconnect_watchers(&self, page: &PageId) {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.pages.get_mut(page) {
            log.notify(&WatchEvent::Error(RemoteError::network("watch connection reset")));
            log.watchers.clear();
        }
    }

    /// Appends a record without any validation and notifies watchers.
    pub fn append_raw(&self, page: &PageId, record: CommitRecord) {
        let mut inner = self.inner.lock();
        let log = inner.pages.entry(*page).or_default();
        log.ids.insert(record.id);
        log.records.push(record.clone());
        let cursor = CursorToken::from_offset(log.records.len() as u64);
        log.notify(&WatchEvent::Records(WatchNotification {
            records: vec![record],
            cursor,
            caught_up: true,
        }));
    }

    /// Returns every record of `page` in log order.
    #[must_use]
    pub fn records(&self, page: &PageId) -> Vec<CommitRecord> {
        self.inner
            .lock()
            .pages
            .get(page)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// Returns the number of records of `page`.
    #[must_use]
    pub fn record_count(&self, page: &PageId) -> usize {
        self.inner.lock().pages.get(page).map_or(0, |log| log.records.len())
    }

    /// Returns the number of objects of `page`.
    #[must_use]
    pub fn object_count(&self, page: &PageId) -> usize {
        self.inner.lock().pages.get(page).map_or(0, |log| log.objects.len())
    }

    /// Returns the number of open watches of `page`.
    #[must_use]
    pub fn watcher_count(&self, page: &PageId) -> usize {
        self.inner
            .lock()
            .pages
            .get(page)
            .map_or(0, |log| log.watchers.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Returns how many times `op` was called.
    #[must_use]
    pub fn calls(&self, op: CloudOp) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }
}

fn over_wire(event: &WatchEvent) -> WatchEvent {
    event
        .encode()
        .and_then(|bytes| WatchEvent::decode(&bytes))
        .unwrap_or_else(|e| {
            WatchEvent::Error(RemoteError::new(RemoteErrorKind::Internal, e.to_string()))
        })
}

fn cursor_offset(cursor: &CursorToken, len: usize) -> RemoteResult<usize> {
    cursor
        .offset()
        .and_then(|offset| usize::try_from(offset).ok())
        .filter(|offset| *offset <= len)
        .ok_or_else(|| RemoteError::new(RemoteErrorKind::InvalidArgument, "bad cursor"))
}

#[async_trait]
impl CloudLog for MemoryCloudLog {
    async fn add_commits(&self, page: &PageId, batch: UploadBatch) -> RemoteResult<()> {
        let batch = batch
            .encode()
            .and_then(|bytes| UploadBatch::decode(&bytes))
            .map_err(|e| RemoteError::new(RemoteErrorKind::InvalidArgument, e.to_string()))?;

        let mut inner = self.inner.lock();
        inner.enter(CloudOp::AddCommits)?;
        let log = inner.pages.entry(*page).or_default();
        if !log.signatures.insert(batch.signature()) {
            debug!(page = %page, signature = ?batch.signature(), "ignoring repeated upload");
            return Ok(());
        }

        let start = log.records.len();
        for record in batch.into_records() {
            if log.ids.insert(record.id) {
                log.records.push(record);
            }
        }
        let appended = log.records[start..].to_vec();
        if appended.is_empty() {
            return Err(RemoteError::new(
                RemoteErrorKind::AlreadyExists,
                "every commit is already stored",
            ));
        }
        let cursor = CursorToken::from_offset(log.records.len() as u64);
        log.notify(&WatchEvent::Records(WatchNotification {
            records: appended,
            cursor,
            caught_up: true,
        }));

        if inner.lost_acks > 0 {
            inner.lost_acks -= 1;
            return Err(RemoteError::network("connection reset before acknowledgement"));
        }
        Ok(())
    }

    async fn get_commits(
        &self,
        page: &PageId,
        cursor: &CursorToken,
        limit: usize,
    ) -> RemoteResult<CommitPage> {
        let mut inner = self.inner.lock();
        inner.enter(CloudOp::GetCommits)?;
        let records: &[CommitRecord] = inner
            .pages
            .get(page)
            .map(|log| log.records.as_slice())
            .unwrap_or(&[]);
        let start = cursor_offset(cursor, records.len())?;
        let end = start.saturating_add(limit.max(1)).min(records.len());
        let response = CommitPage {
            records: records[start..end].to_vec(),
            next: CursorToken::from_offset(end as u64),
            caught_up: end == records.len(),
        };
        response
            .encode()
            .and_then(|bytes| CommitPage::decode(&bytes))
            .map_err(|e| RemoteError::new(RemoteErrorKind::Internal, e.to_string()))
    }

    async fn add_object(
        &self,
        page: &PageId,
        id: ObjectIdentifier,
        content: Bytes,
    ) -> RemoteResult<()> {
        if ObjectIdentifier::of(&content) != id {
            return Err(RemoteError::new(
                RemoteErrorKind::InvalidArgument,
                format!("content does not hash to {id}"),
            ));
        }
        let mut inner = self.inner.lock();
        inner.enter(CloudOp::AddObject)?;
        let log = inner.pages.entry(*page).or_default();
        if log.objects.contains_key(&id) {
            return Err(RemoteError::new(RemoteErrorKind::AlreadyExists, id.to_string()));
        }
        log.objects.insert(id, content);
        Ok(())
    }

    async fn has_object(&self, page: &PageId, id: ObjectIdentifier) -> RemoteResult<bool> {
        let mut inner = self.inner.lock();
        inner.enter(CloudOp::HasObject)?;
        Ok(inner
            .pages
            .get(page)
            .is_some_and(|log| log.objects.contains_key(&id)))
    }

    async fn get_object(&self, page: &PageId, id: ObjectIdentifier) -> RemoteResult<Bytes> {
        let mut inner = self.inner.lock();
        inner.enter(CloudOp::GetObject)?;
        inner
            .pages
            .get(page)
            .and_then(|log| log.objects.get(&id).cloned())
            .ok_or_else(|| RemoteError::not_found(id.to_string()))
    }

    async fn set_watcher(&self, page: &PageId, cursor: CursorToken) -> RemoteResult<WatchStream> {
        let mut inner = self.inner.lock();
        inner.enter(CloudOp::SetWatcher)?;
        let log = inner.pages.entry(*page).or_default();
        let start = cursor_offset(&cursor, log.records.len())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = &log.records[start..];
        if backlog.is_empty() {
            let _ = tx.send(over_wire(&WatchEvent::Records(WatchNotification {
                records: Vec::new(),
                cursor,
                caught_up: true,
            })));
        }
        for (i, record) in backlog.iter().enumerate() {
            let position = start + i + 1;
            let _ = tx.send(over_wire(&WatchEvent::Records(WatchNotification {
                records: vec![record.clone()],
                cursor: CursorToken::from_offset(position as u64),
                caught_up: position == log.records.len(),
            })));
        }
        log.watchers.push(tx);
        debug!(page = %page, from = start, "watch opened");
        Ok(rx)
    }
}

//! Per-page synchronizer.

use crate::cloud::{CloudLog, WatchStream};
use crate::config::SyncConfig;
use crate::download::DownloadBatch;
use crate::error::{SyncError, SyncResult};
use crate::state::{SyncCycleResult, SyncState, SyncStats, SyncStatus};
use bytes::Bytes;
use pagedb_core::{resolve_heads, CommitId, ObjectIdentifier, Page, PageId, Resolution};
use pagedb_sync_protocol::{CursorToken, RemoteResult, WatchEvent};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps one page converged with its remote log.
///
/// A cycle downloads new remote commits, merges divergent heads with the
/// page's merge policy, then uploads local commits. [`Self::sync_once`]
/// runs one cycle; [`Self::run`] runs one and then follows a standing
/// watch, reacting to remote notifications and local commits until
/// cancelled.
///
/// Transient failures (network errors, timeouts) are retried with
/// backoff while the status stays [`SyncState::Syncing`] with a retry
/// countdown. Content errors end in [`SyncState::Error`], rejected
/// credentials in [`SyncState::Unauthorized`].
pub struct PageSynchronizer {
    page: Arc<Page>,
    cloud: Arc<dyn CloudLog>,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    stats: RwLock<SyncStats>,
    cancel: CancellationToken,
    work: Mutex<()>,
}

impl std::fmt::Debug for PageSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSynchronizer")
            .field("page", self.page.id())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl PageSynchronizer {
    /// Creates a synchronizer for `page`.
    #[must_use]
    pub fn new(page: Arc<Page>, cloud: Arc<dyn CloudLog>, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::idle());
        Self {
            page,
            cloud,
            config,
            status,
            stats: RwLock::new(SyncStats::default()),
            cancel: CancellationToken::new(),
            work: Mutex::new(()),
        }
    }

    /// Returns the page.
    #[must_use]
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub(crate) fn page_id(&self) -> &PageId {
        self.page.id()
    }

    pub(crate) fn cloud(&self) -> &dyn CloudLog {
        self.cloud.as_ref()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns the current stats.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub(crate) fn record<F: FnOnce(&mut SyncStats)>(&self, update: F) {
        update(&mut self.stats.write());
    }

    /// Cancels the synchronizer.
    ///
    /// In-flight calls are abandoned. Commits not yet acknowledged stay
    /// marked for upload and the page is left consistent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once [`Self::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a token that is cancelled together with this synchronizer.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    fn set_state(&self, state: SyncState) {
        self.status.send_modify(|status| {
            status.state = state;
            status.retry_in = None;
        });
    }

    /// Performs a remote call with timeout, retry and cancellation.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                outcome = tokio::time::timeout(self.config.timeout, f()) => match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(SyncError::from(err)),
                    Err(_) => Err(SyncError::Timeout),
                },
            };

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        self.status.send_modify(|status| status.retry_in = None);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && retry.allows_retry_after(attempt) => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(page = %self.page_id(), operation, attempt, ?delay, error = %err, "remote call failed, retrying");
                    self.record(|stats| stats.retries += 1);
                    self.status.send_modify(|status| {
                        status.state = SyncState::Syncing;
                        status.retry_in = Some(delay);
                        status.last_error = Some(err.to_string());
                    });
                    tokio::select! {
                        () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs one full cycle: download, merge, upload.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the cycle; the published status
    /// reflects it.
    pub async fn sync_once(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let _work = self.work.lock().await;
        self.set_state(SyncState::Syncing);

        let outcome = async {
            let downloaded = self.pull().await?;
            let merges = self.merge_heads().await?;
            let uploaded = self.upload_pending().await?;
            Ok::<_, SyncError>((downloaded, merges, uploaded))
        }
        .await;

        match outcome.and_then(|counts| Ok((counts, self.settle()?))) {
            Ok(((downloaded, merges, uploaded), state)) => {
                self.record(|stats| {
                    stats.cycles_completed += 1;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                });
                debug!(page = %self.page_id(), downloaded, merges, uploaded, ?state, "sync cycle finished");
                Ok(SyncCycleResult {
                    downloaded,
                    uploaded,
                    merges,
                    state,
                    duration: start.elapsed(),
                })
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Runs a cycle, then follows the remote log until cancelled.
    ///
    /// Local commits trigger uploads; remote notifications are batched and
    /// applied. A dropped watch is re-opened from the persisted cursor when
    /// [`SyncConfig::watch_reconnect`] is set. Cancellation returns
    /// `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns content, storage and authorization errors, and network
    /// errors when reconnection is disabled or retries are exhausted.
    pub async fn run(&self) -> SyncResult<()> {
        let mut reconnects = 0u32;
        loop {
            let outcome = async {
                self.sync_once().await?;
                let cursor = self.persisted_cursor()?;
                let mut stream = self
                    .call("set_watcher", || self.cloud.set_watcher(self.page.id(), cursor.clone()))
                    .await?;
                info!(page = %self.page_id(), "watching remote log");
                self.follow(&mut stream).await
            }
            .await;

            let err = match outcome {
                Ok(()) => SyncError::network_retryable("watch closed"),
                Err(SyncError::Cancelled) => {
                    info!(page = %self.page_id(), "synchronizer cancelled");
                    return Ok(());
                }
                Err(err) => err,
            };

            if !(err.is_retryable() && self.config.watch_reconnect) {
                self.fail(&err);
                return Err(err);
            }

            reconnects = reconnects.saturating_add(1);
            let delay = self.config.retry.delay_for_attempt(reconnects.min(16));
            warn!(page = %self.page_id(), error = %err, ?delay, "watch lost, reconnecting");
            self.status.send_modify(|status| {
                status.state = SyncState::Syncing;
                status.retry_in = Some(delay);
                status.last_error = Some(err.to_string());
            });
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn follow(&self, stream: &mut WatchStream) -> SyncResult<()> {
        let mut batch = DownloadBatch::new(self.config.download_batch_size);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                () = self.page.local_commit_signal().notified() => {
                    let _work = self.work.lock().await;
                    self.set_state(SyncState::Syncing);
                    self.merge_heads().await?;
                    self.upload_pending().await?;
                    self.settle()?;
                }
                event = stream.recv() => match event {
                    None => return Ok(()),
                    Some(WatchEvent::Error(err)) => return Err(SyncError::from(err)),
                    Some(WatchEvent::Records(notification)) => {
                        batch.push(notification.records, notification.cursor);
                        if batch.should_flush(notification.caught_up) {
                            let _work = self.work.lock().await;
                            self.set_state(SyncState::Syncing);
                            self.flush(&mut batch).await?;
                            self.merge_heads().await?;
                            self.upload_pending().await?;
                            self.settle()?;
                        }
                    }
                },
            }
        }
    }

    pub(crate) fn persisted_cursor(&self) -> SyncResult<CursorToken> {
        Ok(self
            .page
            .sync_cursor()?
            .map_or_else(CursorToken::start, CursorToken::from_bytes))
    }

    async fn merge_heads(&self) -> SyncResult<u64> {
        if self.page.is_converged()? {
            return Ok(0);
        }
        let report = resolve_heads(&self.page).await?;
        let merges = report.merges.len() as u64;
        self.record(|stats| stats.merges += merges);
        if let Resolution::AwaitingResolution(heads) = &report.resolution {
            info!(page = %self.page_id(), heads = heads.len(), "page awaiting resolution");
        }
        Ok(merges)
    }

    fn settle(&self) -> SyncResult<SyncState> {
        let state = if self.page.is_converged()? {
            SyncState::Converged
        } else {
            SyncState::AwaitingResolution
        };
        self.status.send_modify(|status| {
            status.state = state;
            status.retry_in = None;
            status.last_error = None;
        });
        Ok(state)
    }

    fn fail(&self, err: &SyncError) {
        if matches!(err, SyncError::Cancelled) {
            return;
        }
        let state = if err.is_auth_failure() {
            SyncState::Unauthorized
        } else if err.is_retryable() {
            // connectivity alone never marks a page as failed
            SyncState::Syncing
        } else {
            SyncState::Error
        };
        warn!(page = %self.page_id(), error = %err, ?state, "sync failed");
        self.record(|stats| stats.last_error = Some(err.to_string()));
        self.status.send_modify(|status| {
            status.state = state;
            status.retry_in = None;
            status.last_error = Some(err.to_string());
        });
    }

    /// Waits until the page is converged and returns its head.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unauthorized`] or [`SyncError::Failed`] if sync
    /// stops in a terminal state, and [`SyncError::Cancelled`] if the
    /// synchronizer is cancelled first.
    pub async fn wait_for_convergence(&self) -> SyncResult<CommitId> {
        let mut rx = self.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status.state {
                SyncState::Converged => return Ok(*self.page.current_head()?.id()),
                SyncState::Unauthorized => {
                    return Err(SyncError::Unauthorized(status.last_error.unwrap_or_default()))
                }
                SyncState::Error => {
                    return Err(SyncError::Failed(status.last_error.unwrap_or_default()))
                }
                _ => {}
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                changed = rx.changed() => if changed.is_err() {
                    return Err(SyncError::Cancelled);
                },
            }
        }
    }

    /// Returns the content of `id`, downloading it if it is not local.
    ///
    /// This is how values of lazy entries are materialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be downloaded or does not
    /// match its identifier.
    pub async fn fetch_object(&self, id: ObjectIdentifier) -> SyncResult<Bytes> {
        if let Some(content) = self.page.objects().get(&id)? {
            return Ok(content);
        }
        let content = self.download_object(id).await?;
        Ok(content)
    }

    pub(crate) async fn download_object(&self, id: ObjectIdentifier) -> SyncResult<Bytes> {
        let content = self
            .call("get_object", || self.cloud.get_object(self.page.id(), id))
            .await?;
        self.page.store_remote_object(id, &content)?;
        self.record(|stats| stats.objects_downloaded += 1);
        Ok(content)
    }
}

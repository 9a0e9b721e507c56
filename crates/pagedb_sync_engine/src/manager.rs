//! Running synchronizers for many pages.

use crate::cloud::CloudLog;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::SyncStatus;
use crate::synchronizer::PageSynchronizer;
use pagedb_core::{Page, PageId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

struct Running {
    sync: Arc<PageSynchronizer>,
    task: JoinHandle<SyncResult<()>>,
}

/// Starts and stops one [`PageSynchronizer::run`] task per page.
///
/// Pages sync concurrently; each page's work stays serialized inside its
/// own task. Must be used from within a Tokio runtime.
pub struct SyncManager {
    cloud: Arc<dyn CloudLog>,
    config: SyncConfig,
    running: Mutex<HashMap<PageId, Running>>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("pages", &self.running.lock().len())
            .finish()
    }
}

impl SyncManager {
    /// Creates a manager syncing against `cloud`.
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudLog>, config: SyncConfig) -> Self {
        Self {
            cloud,
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Starts syncing `page`, or returns its running synchronizer.
    pub fn start(&self, page: Arc<Page>) -> Arc<PageSynchronizer> {
        let mut running = self.running.lock();
        if let Some(existing) = running.get(page.id()) {
            if !existing.task.is_finished() {
                return existing.sync.clone();
            }
        }

        let id = *page.id();
        let sync = Arc::new(PageSynchronizer::new(
            page,
            self.cloud.clone(),
            self.config.clone(),
        ));
        let task = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.run().await })
        };
        info!(page = %id, "started page sync");
        running.insert(
            id,
            Running {
                sync: sync.clone(),
                task,
            },
        );
        sync
    }

    /// Returns the synchronizer of `page`, if started.
    #[must_use]
    pub fn synchronizer(&self, page: &PageId) -> Option<Arc<PageSynchronizer>> {
        self.running.lock().get(page).map(|r| r.sync.clone())
    }

    /// Returns the ids of all started pages.
    #[must_use]
    pub fn pages(&self) -> Vec<PageId> {
        let mut pages: Vec<PageId> = self.running.lock().keys().copied().collect();
        pages.sort();
        pages
    }

    /// Returns the status of every started page.
    #[must_use]
    pub fn statuses(&self) -> Vec<(PageId, SyncStatus)> {
        let mut statuses: Vec<_> = self
            .running
            .lock()
            .iter()
            .map(|(id, r)| (*id, r.sync.status()))
            .collect();
        statuses.sort_by_key(|(id, _)| *id);
        statuses
    }

    /// Stops syncing `page` and returns how its task ended.
    ///
    /// Returns `None` if the page was not started.
    pub async fn stop(&self, page: &PageId) -> Option<SyncResult<()>> {
        let running = self.running.lock().remove(page)?;
        running.sync.cancel();
        let result = match running.task.await {
            Ok(result) => result,
            Err(err) => Err(SyncError::Failed(format!("sync task ended abnormally: {err}"))),
        };
        info!(page = %page, "stopped page sync");
        Some(result)
    }

    /// Stops every page.
    pub async fn shutdown(&self) {
        for page in self.pages() {
            let _ = self.stop(&page).await;
        }
    }
}

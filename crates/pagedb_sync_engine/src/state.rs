//! Sync status of a page.

use std::time::{Duration, Instant};

/// Where a page's synchronization stands.
///
/// ```text
/// Idle ──► Syncing ──► Converged
///             ▲   ├──► AwaitingResolution
///             │   ├──► Error
///             │   └──► Unauthorized
///             └── local write / reconnection
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has run yet.
    Idle,
    /// Uploading, downloading or waiting to retry.
    Syncing,
    /// Local and remote logs agree and the page has one head.
    Converged,
    /// Logs agree but the merge policy left several heads.
    AwaitingResolution,
    /// Sync stopped on a content or local storage error.
    Error,
    /// The remote log rejected our credentials.
    Unauthorized,
}

impl SyncState {
    /// Returns true if the synchronizer is working.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns true if sync has stopped and will not resume by itself.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Error | SyncState::Unauthorized)
    }
}

/// Published status of a page's synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// Delay before the next retry, while waiting out a transient failure.
    pub retry_in: Option<Duration>,
    /// Most recent error, cleared on success.
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub(crate) fn idle() -> Self {
        Self {
            state: SyncState::Idle,
            retry_in: None,
            last_error: None,
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Commits acknowledged by the remote log.
    pub commits_uploaded: u64,
    /// Objects sent to the remote log.
    pub objects_uploaded: u64,
    /// Commits received and finalized locally.
    pub commits_downloaded: u64,
    /// Objects fetched from the remote log.
    pub objects_downloaded: u64,
    /// Merge commits created after downloads.
    pub merges: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last time a cycle completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one [`crate::PageSynchronizer::sync_once`] cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Commits finalized from the remote log.
    pub downloaded: u64,
    /// Commits uploaded.
    pub uploaded: u64,
    /// Merge commits created.
    pub merges: u64,
    /// State the page ended in.
    pub state: SyncState,
    /// Duration of the cycle.
    pub duration: Duration,
}

//! Change feed for observing page updates.
//!
//! The feed emits one [`PageChange`] after every committed change to the
//! page's current state: local journal commits, commits applied from the
//! remote log, and merges. Each event lists the entry keys that changed,
//! with tombstones for deleted keys.
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = page.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(change) = receiver.recv() {
//!         println!("{} keys changed at {}", change.changes.len(), change.commit);
//!     }
//! });
//! ```

use crate::commit::CommitId;
use crate::entries::EntryChange;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// What produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local journal commit.
    Local,
    /// Commits downloaded from the remote log.
    Sync,
    /// A merge of two heads.
    Merge,
}

/// A change to the current state of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChange {
    /// Feed-local sequence number, starting at 1.
    pub sequence: u64,
    /// Head the page reads from after the change.
    pub commit: CommitId,
    /// What produced the change.
    pub origin: ChangeOrigin,
    /// Changed keys, in key order.
    pub changes: Vec<EntryChange>,
}

/// Distributes page changes to subscribers.
///
/// The feed:
/// - Emits only committed changes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<PageChange>>>,
    history: RwLock<Vec<PageChange>>,
    max_history: usize,
    next_sequence: RwLock<u64>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            next_sequence: RwLock::new(1),
        }
    }

    /// Subscribes to future changes.
    pub fn subscribe(&self) -> Receiver<PageChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a change. Empty change lists are dropped.
    pub fn emit(&self, commit: CommitId, origin: ChangeOrigin, changes: Vec<EntryChange>) {
        if changes.is_empty() {
            return;
        }
        let event = {
            let mut next = self.next_sequence.write();
            let event = PageChange {
                sequence: *next,
                commit,
                origin,
                changes,
            };
            *next += 1;
            event
        };

        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        // Disconnected subscribers are dropped
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns retained changes with `sequence > cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<PageChange> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("max_history", &self.max_history)
            .finish()
    }
}

//! Download path: remote records into the commit graph.

use crate::error::{SyncError, SyncResult};
use crate::synchronizer::PageSynchronizer;
use pagedb_core::{Commit, KeyPriority};
use pagedb_sync_protocol::{CommitRecord, CursorToken};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Downloaded records waiting to be applied as one unit.
///
/// Records are keyed by arrival time (with a sequence number breaking
/// ties), so they are applied in the order the log delivered them. The
/// cursor that follows the newest record is applied in the same write.
#[derive(Debug)]
pub struct DownloadBatch {
    threshold: usize,
    records: BTreeMap<(Instant, u64), CommitRecord>,
    next_sequence: u64,
    cursor: Option<CursorToken>,
}

impl DownloadBatch {
    /// Creates an empty batch that is full at `threshold` records.
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            records: BTreeMap::new(),
            next_sequence: 0,
            cursor: None,
        }
    }

    /// Adds records that arrived together and the cursor after them.
    pub fn push(&mut self, records: Vec<CommitRecord>, cursor: CursorToken) {
        let arrived = Instant::now();
        for record in records {
            self.records.insert((arrived, self.next_sequence), record);
            self.next_sequence += 1;
        }
        self.cursor = Some(cursor);
    }

    /// Returns the number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if neither records nor a cursor are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.cursor.is_none()
    }

    /// Returns true once the threshold is reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.threshold
    }

    /// Returns true if the batch should be applied now.
    #[must_use]
    pub fn should_flush(&self, caught_up: bool) -> bool {
        self.is_full() || (caught_up && !self.is_empty())
    }

    /// Empties the batch.
    pub fn take(&mut self) -> (Vec<CommitRecord>, Option<CursorToken>) {
        let records = std::mem::take(&mut self.records).into_values().collect();
        (records, self.cursor.take())
    }
}

impl PageSynchronizer {
    /// Reads the remote log from the persisted cursor to its end.
    pub(crate) async fn pull(&self) -> SyncResult<u64> {
        let limit = self.config().download_batch_size;
        let mut cursor = self.persisted_cursor()?;
        let mut batch = DownloadBatch::new(limit);
        let mut downloaded = 0;
        loop {
            let page = self
                .call("get_commits", || {
                    self.cloud().get_commits(self.page_id(), &cursor, limit)
                })
                .await?;
            cursor = page.next.clone();
            batch.push(page.records, page.next);
            if batch.should_flush(page.caught_up) {
                downloaded += self.flush(&mut batch).await?;
            }
            if page.caught_up {
                return Ok(downloaded);
            }
        }
    }

    /// Applies a batch: decodes and verifies every record, fetches the
    /// objects the new commits need, then inserts the commits and persists
    /// the cursor in one atomic write.
    ///
    /// A record that fails verification fails the whole batch and the
    /// cursor does not move.
    pub(crate) async fn flush(&self, batch: &mut DownloadBatch) -> SyncResult<u64> {
        let (records, cursor) = batch.take();
        let mut commits = Vec::with_capacity(records.len());
        for record in &records {
            let commit = record
                .decode()
                .map_err(|e| SyncError::MalformedRecord(e.to_string()))?;
            commits.push(commit);
        }

        for commit in &commits {
            self.fetch_contents(commit).await?;
        }

        let finalized = self
            .page()
            .apply_remote_commits(commits, cursor.as_ref().map(CursorToken::as_bytes))?;
        let count = finalized.len() as u64;
        self.record(|stats| stats.commits_downloaded += count);
        if !records.is_empty() {
            debug!(page = %self.page_id(), received = records.len(), finalized = count, "applied download batch");
        }
        Ok(count)
    }

    /// Makes sure the root and every eager value of `commit` are local.
    async fn fetch_contents(&self, commit: &Commit) -> SyncResult<()> {
        let page = self.page();
        if page.graph().contains(commit.id())? {
            return Ok(());
        }
        let root = *commit.root_object();
        if !page.objects().has_object(&root)? {
            self.download_object(root).await?;
        }
        for (_, entry) in &page.entry_set_at(commit)? {
            if entry.priority == KeyPriority::Eager && !page.objects().has_object(&entry.object)? {
                self.download_object(entry.object).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_core::CommitId;

    fn record(seed: u8) -> CommitRecord {
        CommitRecord {
            id: CommitId::from_bytes([seed; 32]),
            bytes: vec![seed],
        }
    }

    #[test]
    fn flushes_at_threshold() {
        let mut batch = DownloadBatch::new(3);
        batch.push(vec![record(1), record(2)], CursorToken::from_offset(2));
        assert!(!batch.should_flush(false));
        batch.push(vec![record(3)], CursorToken::from_offset(3));
        assert!(batch.should_flush(false));
    }

    #[test]
    fn flushes_when_caught_up() {
        let mut batch = DownloadBatch::new(64);
        assert!(!batch.should_flush(true));
        batch.push(vec![record(1)], CursorToken::from_offset(1));
        assert!(batch.should_flush(true));
    }

    #[test]
    fn cursor_alone_is_flushed_when_caught_up() {
        let mut batch = DownloadBatch::new(64);
        batch.push(Vec::new(), CursorToken::from_offset(5));
        assert_eq!(batch.len(), 0);
        assert!(batch.should_flush(true));
    }

    #[test]
    fn take_preserves_arrival_order() {
        let mut batch = DownloadBatch::new(64);
        batch.push(vec![record(9), record(1)], CursorToken::from_offset(2));
        batch.push(vec![record(5)], CursorToken::from_offset(3));

        let (records, cursor) = batch.take();
        let seeds: Vec<u8> = records.iter().map(|r| r.bytes[0]).collect();
        assert_eq!(seeds, vec![9, 1, 5]);
        assert_eq!(cursor, Some(CursorToken::from_offset(3)));
        assert!(batch.is_empty());
    }
}

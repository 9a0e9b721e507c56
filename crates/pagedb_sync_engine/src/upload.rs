//! Upload path: local commits into the remote log.

use crate::error::{SyncError, SyncResult};
use crate::synchronizer::PageSynchronizer;
use pagedb_core::{Commit, CommitId, CoreError};
use pagedb_sync_protocol::{CommitRecord, RemoteErrorKind, RemoteResult, UploadBatch};
use tracing::debug;

/// Treats "already stored" as success: uploads are idempotent.
fn accept_existing(result: RemoteResult<()>) -> RemoteResult<()> {
    match result {
        Err(err) if err.kind == RemoteErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

impl PageSynchronizer {
    /// Uploads every unsynced commit in generation order, objects first.
    ///
    /// Commits are sent in signed batches of
    /// [`crate::SyncConfig::upload_batch_size`] and marked synced once the
    /// remote log acknowledges them. A retried batch carries the same
    /// signature, so a lost acknowledgement never duplicates records.
    pub(crate) async fn upload_pending(&self) -> SyncResult<u64> {
        let pending = self.page().unsynced_commits()?;
        let mut uploaded = 0;
        for chunk in pending.chunks(self.config().upload_batch_size) {
            for commit in chunk {
                self.upload_objects(commit).await?;
            }

            let batch = UploadBatch::new(chunk.iter().map(CommitRecord::from_commit).collect());
            self.call("add_commits", || {
                let sent = self.cloud().add_commits(self.page_id(), batch.clone());
                async move { accept_existing(sent.await) }
            })
            .await?;

            let ids: Vec<CommitId> = chunk.iter().map(|c| *c.id()).collect();
            self.page().mark_synced(&ids)?;
            let count = ids.len() as u64;
            uploaded += count;
            self.record(|stats| stats.commits_uploaded += count);
            debug!(page = %self.page_id(), commits = count, signature = ?batch.signature(), "uploaded commits");
        }
        Ok(uploaded)
    }

    async fn upload_objects(&self, commit: &Commit) -> SyncResult<()> {
        for id in self.page().objects_introduced_by(commit)? {
            let present = self
                .call("has_object", || self.cloud().has_object(self.page_id(), id))
                .await?;
            if present {
                continue;
            }
            let content = self
                .page()
                .objects()
                .get(&id)?
                .ok_or(SyncError::Core(CoreError::MissingObject { id }))?;
            self.call("add_object", || {
                let sent = self.cloud().add_object(self.page_id(), id, content.clone());
                async move { accept_existing(sent.await) }
            })
            .await?;
            self.record(|stats| stats.objects_uploaded += 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_sync_protocol::RemoteError;

    #[test]
    fn already_exists_is_success() {
        assert!(accept_existing(Err(RemoteError::new(RemoteErrorKind::AlreadyExists, "dup"))).is_ok());
        assert!(accept_existing(Err(RemoteError::network("down"))).is_err());
        assert!(accept_existing(Ok(())).is_ok());
    }
}

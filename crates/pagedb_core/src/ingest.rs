//! Value ingestion: turning buffers and byte streams into objects.
//!
//! An [`Ingestion`] hashes content incrementally as chunks arrive and only
//! touches storage when it finishes, at which point every value row of the
//! object is staged into one batch. A failed or abandoned ingestion leaves
//! nothing behind.
//!
//! ```text
//! Streaming --feed--> Streaming --finish--> Done
//!     |                                 \
//!     +----------- fail / bad length ----+--> Error
//! ```

use crate::error::{CoreError, CoreResult};
use crate::object::{ContentHasher, ObjectIdentifier, ObjectStore};
use bytes::Bytes;
use pagedb_storage::WriteBatch;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// State of an [`Ingestion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    /// Accepting chunks.
    Streaming,
    /// Finished; the object's rows were staged.
    Done(ObjectIdentifier),
    /// Failed; nothing was staged.
    Error(String),
}

/// Incremental ingestion of one value.
#[derive(Debug)]
pub struct Ingestion {
    hasher: ContentHasher,
    buffer: Vec<u8>,
    expected_len: Option<u64>,
    state: IngestState,
}

impl Default for Ingestion {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingestion {
    /// Starts an ingestion of unknown length.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: ContentHasher::new(),
            buffer: Vec::new(),
            expected_len: None,
            state: IngestState::Streaming,
        }
    }

    /// Starts an ingestion that must end at exactly `len` bytes.
    #[must_use]
    pub fn with_expected_len(len: u64) -> Self {
        let mut ingestion = Self::new();
        ingestion.expected_len = Some(len);
        ingestion.buffer.reserve(len.min(16 * 1024 * 1024) as usize);
        ingestion
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &IngestState {
        &self.state
    }

    /// Returns how many bytes have been accepted.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.hasher.size()
    }

    /// Appends the next chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingestion is not streaming or the chunk runs
    /// past the expected length; the ingestion is failed in the latter case.
    pub fn feed(&mut self, chunk: &[u8]) -> CoreResult<()> {
        self.check_streaming()?;
        if let Some(expected) = self.expected_len {
            if self.received() + chunk.len() as u64 > expected {
                return Err(self.fail(format!(
                    "received more than the declared {expected} bytes"
                )));
            }
        }
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Accepts a chunk that starts at `offset` in the value.
    ///
    /// Bytes before [`Ingestion::received`] were already hashed and are
    /// skipped, so a retried sender may resend from an earlier offset.
    ///
    /// # Errors
    ///
    /// Fails the ingestion if the chunk starts after the received length.
    pub fn feed_at(&mut self, offset: u64, chunk: &[u8]) -> CoreResult<()> {
        self.check_streaming()?;
        let received = self.received();
        if offset > received {
            return Err(self.fail(format!(
                "chunk at offset {offset} leaves a gap after {received} bytes"
            )));
        }
        let overlap = (received - offset).min(chunk.len() as u64) as usize;
        self.feed(&chunk[overlap..])
    }

    /// Marks the ingestion failed and returns the matching error.
    pub fn fail(&mut self, reason: impl Into<String>) -> CoreError {
        let reason = reason.into();
        self.buffer = Vec::new();
        self.state = IngestState::Error(reason.clone());
        CoreError::ingestion(reason)
    }

    /// Completes the ingestion, staging the object's rows into `batch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingestion is not streaming, fewer bytes than
    /// declared were received, or the store cannot be read.
    pub fn finish(
        &mut self,
        objects: &ObjectStore,
        batch: &mut WriteBatch,
    ) -> CoreResult<ObjectIdentifier> {
        self.check_streaming()?;
        if let Some(expected) = self.expected_len {
            if self.received() != expected {
                let received = self.received();
                return Err(self.fail(format!(
                    "stream ended at {received} of {expected} bytes"
                )));
            }
        }

        let hasher = std::mem::take(&mut self.hasher);
        let content = std::mem::take(&mut self.buffer);
        let id = hasher.finish();
        objects.stage_put_carried(batch, id, &content)?;
        self.state = IngestState::Done(id);
        Ok(id)
    }

    fn check_streaming(&self) -> CoreResult<()> {
        match &self.state {
            IngestState::Streaming => Ok(()),
            IngestState::Done(_) => Err(CoreError::invalid_operation("ingestion already finished")),
            IngestState::Error(reason) => Err(CoreError::ingestion(reason.clone())),
        }
    }
}

/// Where a value's bytes come from.
#[derive(Debug)]
pub enum DataSource {
    /// An owned in-memory buffer.
    Memory(Bytes),
    /// A buffer shared with other owners.
    Shared(Arc<[u8]>),
    /// Chunks arriving on a channel, totalling `total_len` bytes.
    Stream {
        /// Declared total length.
        total_len: u64,
        /// Chunk receiver. Closing it ends the stream.
        rx: mpsc::Receiver<Bytes>,
    },
}

impl From<Bytes> for DataSource {
    fn from(bytes: Bytes) -> Self {
        DataSource::Memory(bytes)
    }
}

impl From<Vec<u8>> for DataSource {
    fn from(bytes: Vec<u8>) -> Self {
        DataSource::Memory(Bytes::from(bytes))
    }
}

/// Ingests `source` and stages its rows into `batch`.
///
/// # Errors
///
/// Returns an error if a stream delivers a different number of bytes than
/// declared. Nothing is staged in that case.
pub async fn stage_ingest(
    objects: &ObjectStore,
    batch: &mut WriteBatch,
    source: DataSource,
) -> CoreResult<ObjectIdentifier> {
    let mut ingestion = match source {
        DataSource::Memory(bytes) => {
            let mut ingestion = Ingestion::with_expected_len(bytes.len() as u64);
            ingestion.feed(&bytes)?;
            ingestion
        }
        DataSource::Shared(shared) => {
            let mut ingestion = Ingestion::with_expected_len(shared.len() as u64);
            ingestion.feed(&shared)?;
            ingestion
        }
        DataSource::Stream { total_len, mut rx } => {
            let mut ingestion = Ingestion::with_expected_len(total_len);
            while let Some(chunk) = rx.recv().await {
                ingestion.feed(&chunk)?;
            }
            ingestion
        }
    };
    let id = ingestion.finish(objects, batch)?;
    debug!(page = %objects.page(), object = %id, "ingested value");
    Ok(id)
}

/// Ingests `source` and writes the object in one atomic batch.
///
/// # Errors
///
/// See [`stage_ingest`]; storage errors are also returned.
pub async fn ingest(
    objects: &ObjectStore,
    store: &dyn pagedb_storage::KvStore,
    source: DataSource,
) -> CoreResult<ObjectIdentifier> {
    let mut batch = WriteBatch::new();
    let id = stage_ingest(objects, &mut batch, source).await?;
    if !batch.is_empty() {
        store.write(batch)?;
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FRAGMENT_SIZE;
    use crate::types::PageId;
    use pagedb_storage::{InMemoryStore, KvStore};

    fn setup() -> (Arc<InMemoryStore>, ObjectStore) {
        let kv = Arc::new(InMemoryStore::new());
        let objects = ObjectStore::new(kv.clone(), PageId::new());
        (kv, objects)
    }

    #[test]
    fn chunked_ingestion_matches_direct_put() {
        let (kv, objects) = setup();
        let mut ingestion = Ingestion::with_expected_len(11);
        ingestion.feed(b"hello ").unwrap();
        ingestion.feed(b"world").unwrap();

        let mut batch = WriteBatch::new();
        let id = ingestion.finish(&objects, &mut batch).unwrap();
        kv.write(batch).unwrap();

        assert_eq!(id, ObjectIdentifier::of(b"hello world"));
        assert_eq!(ingestion.state(), &IngestState::Done(id));
        assert!(objects.has_object(&id).unwrap());
    }

    #[test]
    fn retried_chunks_are_not_double_counted() {
        let (_, objects) = setup();
        let mut ingestion = Ingestion::with_expected_len(6);
        ingestion.feed_at(0, b"abcd").unwrap();
        // sender retries from offset 2 after a lost ack
        ingestion.feed_at(2, b"cdef").unwrap();
        assert_eq!(ingestion.received(), 6);

        let mut batch = WriteBatch::new();
        let id = ingestion.finish(&objects, &mut batch).unwrap();
        assert_eq!(id, ObjectIdentifier::of(b"abcdef"));
    }

    #[test]
    fn gap_fails_ingestion() {
        let mut ingestion = Ingestion::new();
        ingestion.feed(b"ab").unwrap();
        assert!(ingestion.feed_at(5, b"xyz").is_err());
        assert!(matches!(ingestion.state(), IngestState::Error(_)));
        assert!(ingestion.feed(b"more").is_err());
    }

    #[test]
    fn short_stream_stages_nothing() {
        let (_, objects) = setup();
        let mut ingestion = Ingestion::with_expected_len(10);
        ingestion.feed(b"short").unwrap();

        let mut batch = WriteBatch::new();
        assert!(ingestion.finish(&objects, &mut batch).is_err());
        assert!(batch.is_empty());
    }

    #[test]
    fn overlong_chunk_fails() {
        let mut ingestion = Ingestion::with_expected_len(2);
        assert!(ingestion.feed(b"abc").is_err());
        assert!(matches!(ingestion.state(), IngestState::Error(_)));
    }

    #[test]
    fn finished_ingestion_rejects_more_data() {
        let (_, objects) = setup();
        let mut ingestion = Ingestion::new();
        let mut batch = WriteBatch::new();
        let id = ingestion.finish(&objects, &mut batch).unwrap();
        assert_eq!(id, ObjectIdentifier::of(b""));
        assert!(matches!(
            ingestion.feed(b"late"),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn stream_source_is_fragmented_atomically() {
        let (kv, objects) = setup();
        let total = FRAGMENT_SIZE * 2 + 5;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let data = vec![3u8; total];
            for chunk in data.chunks(10_000) {
                tx.send(Bytes::copy_from_slice(chunk)).await.unwrap();
            }
        });

        let id = ingest(
            &objects,
            kv.as_ref(),
            DataSource::Stream {
                total_len: total as u64,
                rx,
            },
        )
        .await
        .unwrap();

        assert_eq!(id.size(), total as u64);
        assert_eq!(objects.get(&id).unwrap().unwrap().len(), total);
    }

    #[tokio::test]
    async fn truncated_stream_leaves_store_untouched() {
        let (kv, objects) = setup();
        let (tx, rx) = mpsc::channel(1);
        tx.send(Bytes::from_static(b"partial")).await.unwrap();
        drop(tx);

        let result = ingest(
            &objects,
            kv.as_ref(),
            DataSource::Stream { total_len: 100, rx },
        )
        .await;
        assert!(matches!(result, Err(CoreError::Ingestion { .. })));
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn shared_source() {
        let (kv, objects) = setup();
        let shared: Arc<[u8]> = Arc::from(b"shared bytes".as_slice());
        let id = ingest(&objects, kv.as_ref(), DataSource::Shared(shared))
            .await
            .unwrap();
        assert_eq!(id, ObjectIdentifier::of(b"shared bytes"));
    }
}

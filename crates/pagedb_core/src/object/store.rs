//! Content-addressed object storage and entry references of one page.

use crate::cbor;
use crate::entries::{Entry, EntrySet};
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::object::ObjectIdentifier;
use crate::types::{KeyPriority, PageId};
use bytes::Bytes;
use pagedb_storage::{KvStore, WriteBatch};
use std::fmt;
use std::sync::Arc;

/// Values longer than this are stored as fragments plus an index row.
pub const FRAGMENT_SIZE: usize = 64 * 1024;

const TAG_INLINE: u8 = 0;
const TAG_INDEX: u8 = 1;

/// Immutable blob storage for one page.
///
/// Each object lives in exactly one value row keyed by its digest, however
/// many entries or commits point at it. A value row is either:
///
/// - `[0][content]` for values up to [`FRAGMENT_SIZE`]
/// - `[1][CBOR list of fragment identifiers]` for larger values, each
///   fragment being an inline object in its own right
///
/// Every write of an object (the index row and all of its fragments) is
/// staged into a single [`WriteBatch`], so after a crash an object is either
/// fully readable or absent.
#[derive(Clone)]
pub struct ObjectStore {
    store: Arc<dyn KvStore>,
    page: PageId,
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("page", &self.page)
            .finish()
    }
}

impl ObjectStore {
    /// Creates an object store for `page` over `store`.
    pub fn new(store: Arc<dyn KvStore>, page: PageId) -> Self {
        Self { store, page }
    }

    /// Returns the page this store belongs to.
    #[must_use]
    pub fn page(&self) -> &PageId {
        &self.page
    }

    /// Stores `content` and returns its identifier.
    ///
    /// Idempotent: storing content that is already present writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn put(&self, content: &[u8]) -> CoreResult<ObjectIdentifier> {
        let mut batch = WriteBatch::new();
        let id = self.stage_put(&mut batch, content)?;
        if !batch.is_empty() {
            self.store.write(batch)?;
        }
        Ok(id)
    }

    /// Stages the rows for `content` into `batch` and returns its identifier.
    ///
    /// Rows already present in the store or already staged in `batch` are
    /// not staged again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn stage_put(&self, batch: &mut WriteBatch, content: &[u8]) -> CoreResult<ObjectIdentifier> {
        let id = ObjectIdentifier::of(content);
        self.stage_put_hashed(batch, id, content)?;
        Ok(id)
    }

    /// Stores content received under a claimed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HashMismatch`] if `content` does not hash to `id`.
    pub fn put_verified(&self, id: ObjectIdentifier, content: &[u8]) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        self.stage_put_verified(&mut batch, id, content)?;
        if !batch.is_empty() {
            self.store.write(batch)?;
        }
        Ok(())
    }

    /// Stages content received under a claimed identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HashMismatch`] if `content` does not hash to `id`.
    pub fn stage_put_verified(
        &self,
        batch: &mut WriteBatch,
        id: ObjectIdentifier,
        content: &[u8],
    ) -> CoreResult<()> {
        let actual = ObjectIdentifier::of(content);
        if actual != id {
            return Err(CoreError::HashMismatch {
                expected: id,
                actual,
            });
        }
        self.stage_put_hashed(batch, id, content)
    }

    /// Stages content whose identifier the caller already computed.
    pub(crate) fn stage_put_hashed(
        &self,
        batch: &mut WriteBatch,
        id: ObjectIdentifier,
        content: &[u8],
    ) -> CoreResult<()> {
        self.stage_rows(batch, id, content, true)
    }

    /// Stages every row of `content` that `batch` does not carry yet, even
    /// rows the store already holds.
    ///
    /// Writing the batch then stores the object no matter what happened to
    /// the stored rows in between, e.g. a garbage collection of an orphan
    /// with the same content.
    pub(crate) fn stage_put_carried(
        &self,
        batch: &mut WriteBatch,
        id: ObjectIdentifier,
        content: &[u8],
    ) -> CoreResult<()> {
        self.stage_rows(batch, id, content, false)
    }

    fn stage_rows(
        &self,
        batch: &mut WriteBatch,
        id: ObjectIdentifier,
        content: &[u8],
        skip_stored: bool,
    ) -> CoreResult<()> {
        if self.row_present(batch, id.digest(), skip_stored)? {
            return Ok(());
        }

        if content.len() <= FRAGMENT_SIZE {
            batch.put(keys::value_row_key(&self.page, &id), inline_row(content));
            return Ok(());
        }

        let mut index = Vec::with_capacity(content.len() / FRAGMENT_SIZE + 1);
        for chunk in content.chunks(FRAGMENT_SIZE) {
            let fragment = ObjectIdentifier::of(chunk);
            if !self.row_present(batch, fragment.digest(), skip_stored)? {
                batch.put(keys::value_row_key(&self.page, &fragment), inline_row(chunk));
            }
            index.push(fragment);
        }
        let mut row = vec![TAG_INDEX];
        row.extend_from_slice(&cbor::to_vec(&index)?);
        batch.put(keys::value_row_key(&self.page, &id), row);
        Ok(())
    }

    fn row_present(
        &self,
        batch: &WriteBatch,
        digest: &[u8; 32],
        check_store: bool,
    ) -> CoreResult<bool> {
        let key = keys::value_row_key_for_digest(&self.page, digest);
        match batch.pending_value(&key) {
            Some(staged) => Ok(staged.is_some()),
            None if check_store => Ok(self.store.contains(&key)?),
            None => Ok(false),
        }
    }

    /// Returns true if `batch` stages the object's row or the store holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub(crate) fn is_staged_or_stored(
        &self,
        batch: &WriteBatch,
        id: &ObjectIdentifier,
    ) -> CoreResult<bool> {
        match batch.pending_value(&keys::value_row_key(&self.page, id)) {
            Some(staged) => Ok(staged.is_some()),
            None => self.has_object(id),
        }
    }

    /// Reads an object.
    ///
    /// Returns `Ok(None)` if the object is not stored locally, even when it
    /// exists remotely; fetching is the synchronizer's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the value row is unreadable or its contents do
    /// not match the identifier's size.
    pub fn get(&self, id: &ObjectIdentifier) -> CoreResult<Option<Bytes>> {
        let Some(content) = self.content_by_digest(id.digest())? else {
            return Ok(None);
        };
        if content.len() as u64 != id.size() {
            return Err(CoreError::malformed_object(format!(
                "object {id} has {} bytes",
                content.len()
            )));
        }
        Ok(Some(content))
    }

    /// Reads the contents stored under `digest`, reassembling fragments.
    ///
    /// # Errors
    ///
    /// Returns an error if the row or one of its fragments is unreadable.
    pub fn content_by_digest(&self, digest: &[u8; 32]) -> CoreResult<Option<Bytes>> {
        let Some(row) = self
            .store
            .get(&keys::value_row_key_for_digest(&self.page, digest))?
        else {
            return Ok(None);
        };

        match row.split_first() {
            Some((&TAG_INLINE, data)) => Ok(Some(Bytes::copy_from_slice(data))),
            Some((&TAG_INDEX, encoded)) => {
                let index: Vec<ObjectIdentifier> = cbor::from_slice(encoded, "fragment index")?;
                let total: u64 = index.iter().map(ObjectIdentifier::size).sum();
                let mut content = Vec::with_capacity(total as usize);
                for fragment in index {
                    let row = self
                        .store
                        .get(&keys::value_row_key(&self.page, &fragment))?
                        .ok_or(CoreError::MissingObject { id: fragment })?;
                    match row.split_first() {
                        Some((&TAG_INLINE, data)) => content.extend_from_slice(data),
                        _ => {
                            return Err(CoreError::malformed_object(format!(
                                "fragment {fragment} is not inline"
                            )))
                        }
                    }
                }
                Ok(Some(Bytes::from(content)))
            }
            Some((tag, _)) => Err(CoreError::malformed_object(format!(
                "unknown value row tag {tag}"
            ))),
            None => Err(CoreError::malformed_object("empty value row")),
        }
    }

    /// Returns true if the object is stored locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn has_object(&self, id: &ObjectIdentifier) -> CoreResult<bool> {
        Ok(self.store.contains(&keys::value_row_key(&self.page, id))?)
    }

    /// Returns the fragments of a fragmented object, or an empty list for
    /// inline and absent objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the index row cannot be decoded.
    pub fn fragments(&self, digest: &[u8; 32]) -> CoreResult<Vec<ObjectIdentifier>> {
        match self
            .store
            .get(&keys::value_row_key_for_digest(&self.page, digest))?
        {
            Some(row) if row.first() == Some(&TAG_INDEX) => {
                cbor::from_slice(&row[1..], "fragment index")
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Lists the digests of every locally stored value row, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn object_digests(&self) -> CoreResult<Vec<[u8; 32]>> {
        let prefix = keys::value_prefix(&self.page);
        Ok(self
            .store
            .scan_keys(&prefix)?
            .iter()
            .filter_map(|row| keys::digest_from_row_key(&prefix, row))
            .collect())
    }

    /// Stages removal of a single value row. Only garbage collection calls
    /// this; fragments are separate rows and are not touched.
    pub fn stage_delete_object(&self, batch: &mut WriteBatch, digest: &[u8; 32]) {
        batch.delete(keys::value_row_key_for_digest(&self.page, digest));
    }

    /// Points `key` at `id`. The value row itself is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_entry_reference(
        &self,
        key: &[u8],
        id: ObjectIdentifier,
        priority: KeyPriority,
    ) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        self.stage_entry_reference(&mut batch, key, &Entry::new(id, priority))?;
        self.store.write(batch)?;
        Ok(())
    }

    /// Stages a reference row write.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be encoded.
    pub fn stage_entry_reference(
        &self,
        batch: &mut WriteBatch,
        key: &[u8],
        entry: &Entry,
    ) -> CoreResult<()> {
        batch.put(keys::reference_row_key(&self.page, key), cbor::to_vec(entry)?);
        Ok(())
    }

    /// Removes the reference row for `key`. The value row is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn delete_entry_reference(&self, key: &[u8]) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        self.stage_delete_entry_reference(&mut batch, key);
        self.store.write(batch)?;
        Ok(())
    }

    /// Stages removal of the reference row for `key`.
    pub fn stage_delete_entry_reference(&self, batch: &mut WriteBatch, key: &[u8]) {
        batch.delete(keys::reference_row_key(&self.page, key));
    }

    /// Reads the reference row for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is unreadable.
    pub fn entry_reference(&self, key: &[u8]) -> CoreResult<Option<Entry>> {
        self.store
            .get(&keys::reference_row_key(&self.page, key))?
            .map(|row| cbor::from_slice(&row, "reference row"))
            .transpose()
    }

    /// Reads every reference row, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if a row is unreadable.
    pub fn entry_references(&self) -> CoreResult<EntrySet> {
        let mut entries = EntrySet::new();
        for (row, value) in self.store.scan_prefix(&keys::reference_prefix(&self.page))? {
            let key = keys::entry_key_from_reference_row_key(&row)
                .ok_or_else(|| CoreError::malformed_object("reference row key"))?;
            entries.insert(key, cbor::from_slice(&value, "reference row")?);
        }
        Ok(entries)
    }
}

fn inline_row(content: &[u8]) -> Vec<u8> {
    let mut row = Vec::with_capacity(content.len() + 1);
    row.push(TAG_INLINE);
    row.extend_from_slice(content);
    row
}

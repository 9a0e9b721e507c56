//! The commit DAG of one page.

use super::{Commit, CommitId};
use crate::cbor;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::object::{ObjectIdentifier, ObjectStore};
use crate::types::PageId;
use pagedb_storage::{KvStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Where a known commit stands in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    /// All ancestors are present; the commit is part of the DAG.
    Finalized,
    /// Buffered until the listed parents are finalized.
    Pending {
        /// Parents not finalized yet.
        missing: Vec<CommitId>,
    },
}

#[derive(Serialize, Deserialize)]
struct CommitIndexRow {
    generation: u64,
    timestamp: u64,
    size: u64,
}

/// The DAG of commits for a page.
///
/// The graph is append-only. Commits are stored as objects (their encoded
/// form is the object content) plus an index row recording generation,
/// timestamp and size; head markers track commits with no finalized child.
///
/// Commits received out of order are kept as pending rows and promoted as
/// soon as their last missing parent is finalized, so the graph never holds
/// a dangling edge.
///
/// Mutating methods stage rows into a caller-provided [`WriteBatch`] so the
/// caller can commit graph changes together with reference rows and the
/// sync cursor.
#[derive(Clone)]
pub struct CommitGraph {
    store: Arc<dyn KvStore>,
    objects: ObjectStore,
    page: PageId,
}

impl fmt::Debug for CommitGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitGraph")
            .field("page", &self.page)
            .finish()
    }
}

impl CommitGraph {
    /// Creates a graph view for `page`.
    pub fn new(store: Arc<dyn KvStore>, page: PageId) -> Self {
        let objects = ObjectStore::new(store.clone(), page);
        Self {
            store,
            objects,
            page,
        }
    }

    /// Stages the shared root commit (and its empty entry set) if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn stage_root(&self, batch: &mut WriteBatch) -> CoreResult<Commit> {
        let root = Commit::root()?;
        if !self.contains(root.id())? {
            self.objects
                .stage_put(batch, &crate::entries::EntrySet::new().to_bytes()?)?;
            self.stage_finalize(batch, &root)?;
        }
        Ok(root)
    }

    /// Returns true if `id` is finalized.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn contains(&self, id: &CommitId) -> CoreResult<bool> {
        Ok(self.store.contains(&keys::commit_row_key(&self.page, id))?)
    }

    /// Loads a finalized commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the index row exists but the commit object is
    /// missing or does not hash to `id`.
    pub fn commit(&self, id: &CommitId) -> CoreResult<Option<Commit>> {
        let Some(index) = self.index_row(id)? else {
            return Ok(None);
        };
        let object = ObjectIdentifier::from_parts(*id.as_bytes(), index.size);
        let bytes = self
            .objects
            .get(&object)?
            .ok_or(CoreError::MissingObject { id: object })?;
        Commit::decode_verified(id, &bytes).map(Some)
    }

    /// Loads a finalized commit that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingCommit`] if it does not.
    pub fn require(&self, id: &CommitId) -> CoreResult<Commit> {
        self.commit(id)?
            .ok_or(CoreError::MissingCommit { id: *id })
    }

    /// Returns the state of a known commit, or `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn state(&self, id: &CommitId) -> CoreResult<Option<CommitState>> {
        if self.contains(id)? {
            return Ok(Some(CommitState::Finalized));
        }
        let Some(bytes) = self.store.get(&keys::pending_row_key(&self.page, id))? else {
            return Ok(None);
        };
        let commit = Commit::decode_verified(id, &bytes)?;
        Ok(Some(CommitState::Pending {
            missing: self.missing_parents(&commit)?,
        }))
    }

    fn missing_parents(&self, commit: &Commit) -> CoreResult<Vec<CommitId>> {
        let mut missing = Vec::new();
        for parent in commit.parents() {
            if !self.contains(parent)? {
                missing.push(*parent);
            }
        }
        Ok(missing)
    }

    /// Returns the ids of all heads, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn heads(&self) -> CoreResult<Vec<CommitId>> {
        let prefix = keys::head_prefix(&self.page);
        Ok(self
            .store
            .scan_keys(&prefix)?
            .iter()
            .filter_map(|row| keys::digest_from_row_key(&prefix, row))
            .map(CommitId::from_bytes)
            .collect())
    }

    /// Returns all head commits, oldest first (timestamp, then id).
    ///
    /// # Errors
    ///
    /// Returns an error if a head cannot be loaded.
    pub fn head_commits(&self) -> CoreResult<Vec<Commit>> {
        let mut heads = self
            .heads()?
            .iter()
            .map(|id| self.require(id))
            .collect::<CoreResult<Vec<_>>>()?;
        heads.sort_by_key(Commit::age_key);
        Ok(heads)
    }

    /// Returns every buffered commit with the parents it still waits for.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending row cannot be decoded.
    pub fn pending(&self) -> CoreResult<Vec<(Commit, Vec<CommitId>)>> {
        self.pending_commits()?
            .into_values()
            .map(|commit| {
                let missing = self.missing_parents(&commit)?;
                Ok((commit, missing))
            })
            .collect()
    }

    fn pending_commits(&self) -> CoreResult<BTreeMap<CommitId, Commit>> {
        let prefix = keys::pending_prefix(&self.page);
        let mut pending = BTreeMap::new();
        for (row, bytes) in self.store.scan_prefix(&prefix)? {
            let digest = keys::digest_from_row_key(&prefix, &row)
                .ok_or_else(|| CoreError::malformed_object("pending row key"))?;
            let id = CommitId::from_bytes(digest);
            pending.insert(id, Commit::decode_verified(&id, &bytes)?);
        }
        Ok(pending)
    }

    /// Returns the ids of every finalized commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn commit_ids(&self) -> CoreResult<Vec<CommitId>> {
        let prefix = keys::commit_prefix(&self.page);
        Ok(self
            .store
            .scan_keys(&prefix)?
            .iter()
            .filter_map(|row| keys::digest_from_row_key(&prefix, row))
            .map(CommitId::from_bytes)
            .collect())
    }

    /// Returns the generation of a finalized commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the index row cannot be decoded.
    pub fn generation(&self, id: &CommitId) -> CoreResult<Option<u64>> {
        Ok(self.index_row(id)?.map(|row| row.generation))
    }

    fn index_row(&self, id: &CommitId) -> CoreResult<Option<CommitIndexRow>> {
        self.store
            .get(&keys::commit_row_key(&self.page, id))?
            .map(|row| cbor::from_slice(&row, "commit index row"))
            .transpose()
    }

    fn stage_finalize(&self, batch: &mut WriteBatch, commit: &Commit) -> CoreResult<()> {
        self.objects
            .stage_put_hashed(batch, commit.object_id(), commit.encoded())?;
        let index = CommitIndexRow {
            generation: commit.generation(),
            timestamp: commit.timestamp(),
            size: commit.encoded().len() as u64,
        };
        batch.put(
            keys::commit_row_key(&self.page, commit.id()),
            cbor::to_vec(&index)?,
        );
        batch.put(keys::head_row_key(&self.page, commit.id()), Vec::new());
        for parent in commit.parents() {
            batch.delete(keys::head_row_key(&self.page, parent));
        }
        Ok(())
    }

    /// Creates a local commit on top of finalized parents.
    ///
    /// The generation is derived from the parents. If an identical commit
    /// already exists it is returned and nothing is staged.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingParent`] if a parent is not finalized.
    pub fn create_commit(
        &self,
        batch: &mut WriteBatch,
        parents: Vec<CommitId>,
        root: ObjectIdentifier,
        timestamp: u64,
    ) -> CoreResult<Commit> {
        if parents.is_empty() {
            return Err(CoreError::invalid_operation(
                "only the root commit has no parents",
            ));
        }
        let mut generation = 0;
        for parent in &parents {
            let parent_generation = self
                .generation(parent)?
                .ok_or(CoreError::MissingParent { parent: *parent })?;
            generation = generation.max(parent_generation + 1);
        }

        let commit = Commit::new(parents, timestamp, generation, root)?;
        if !self.contains(commit.id())? {
            self.stage_finalize(batch, &commit)?;
            debug!(page = %self.page, commit = %commit.id(), generation, "created commit");
        }
        Ok(commit)
    }

    /// Adds commits received from elsewhere, in any order.
    ///
    /// Returns the commits finalized by this call, parents before children.
    ///
    /// # Errors
    ///
    /// See [`CommitGraph::stage_commits`].
    pub fn add_commits(&self, commits: Vec<Commit>) -> CoreResult<Vec<Commit>> {
        let mut batch = WriteBatch::new();
        let finalized = self.stage_commits(&mut batch, commits)?;
        if !batch.is_empty() {
            self.store.write(batch)?;
        }
        Ok(finalized)
    }

    /// Stages received commits.
    ///
    /// Known commits are ignored. A commit whose parents are all finalized
    /// (or finalized earlier in this call) is finalized; the rest are
    /// buffered as pending rows. Previously buffered commits are promoted
    /// when this call supplies their missing ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedCommit`] for a parentless commit other
    /// than the shared root, or a generation that does not follow from the
    /// parents. Nothing should be written in that case.
    pub fn stage_commits(
        &self,
        batch: &mut WriteBatch,
        commits: Vec<Commit>,
    ) -> CoreResult<Vec<Commit>> {
        let root = Commit::root()?;
        let mut waiting = self.pending_commits()?;
        let mut arrived = HashSet::new();

        for commit in commits {
            if commit.parents().is_empty() {
                if commit.id() != root.id() {
                    return Err(CoreError::malformed_commit(format!(
                        "foreign root commit {}",
                        commit.id()
                    )));
                }
                continue;
            }
            if waiting.contains_key(commit.id()) || self.contains(commit.id())? {
                continue;
            }
            arrived.insert(*commit.id());
            waiting.insert(*commit.id(), commit);
        }

        let mut generations: HashMap<CommitId, u64> = HashMap::new();
        let mut finalized = Vec::new();
        loop {
            let mut ready = Vec::new();
            for commit in waiting.values() {
                let mut expected = 0;
                let mut complete = true;
                for parent in commit.parents() {
                    let known = match generations.get(parent) {
                        Some(generation) => Some(*generation),
                        None => self.generation(parent)?,
                    };
                    match known {
                        Some(generation) => expected = expected.max(generation + 1),
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    if commit.generation() != expected {
                        return Err(CoreError::malformed_commit(format!(
                            "commit {} claims generation {} but its parents imply {}",
                            commit.id(),
                            commit.generation(),
                            expected
                        )));
                    }
                    ready.push(*commit.id());
                }
            }
            if ready.is_empty() {
                break;
            }

            for id in ready {
                let Some(commit) = waiting.remove(&id) else {
                    continue;
                };
                self.stage_finalize(batch, &commit)?;
                if !arrived.contains(&id) {
                    batch.delete(keys::pending_row_key(&self.page, &id));
                }
                debug!(page = %self.page, commit = %id, generation = commit.generation(), "finalized commit");
                generations.insert(id, commit.generation());
                finalized.push(commit);
            }
        }

        for (id, commit) in &waiting {
            if arrived.contains(id) {
                batch.put(keys::pending_row_key(&self.page, id), commit.encoded().to_vec());
                debug!(page = %self.page, commit = %id, "buffered commit with missing parents");
            }
        }

        finalized.sort_by_key(|c| (c.generation(), *c.id()));
        Ok(finalized)
    }

    /// Returns true if `ancestor` is reachable from `descendant` through
    /// parent edges. A commit is its own ancestor.
    ///
    /// The walk never descends below the ancestor's generation.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit on the walk cannot be loaded.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> CoreResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let Some(floor) = self.generation(ancestor)? else {
            return Ok(false);
        };

        let mut stack = vec![*descendant];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            let commit = self.require(&id)?;
            for parent in commit.parents() {
                if parent == ancestor {
                    return Ok(true);
                }
                if !visited.insert(*parent) {
                    continue;
                }
                if self.generation(parent)?.is_some_and(|g| g > floor) {
                    stack.push(*parent);
                }
            }
        }
        Ok(false)
    }

    /// Returns every ancestor of `id`, including itself.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit on the walk cannot be loaded.
    pub fn ancestors(&self, id: &CommitId) -> CoreResult<Vec<Commit>> {
        let mut out = Vec::new();
        let mut stack = vec![*id];
        let mut visited = HashSet::from([*id]);
        while let Some(next) = stack.pop() {
            let commit = self.require(&next)?;
            for parent in commit.parents() {
                if visited.insert(*parent) {
                    stack.push(*parent);
                }
            }
            out.push(commit);
        }
        Ok(out)
    }

    /// Finds the lowest common ancestor of two commits.
    ///
    /// Walks `b`'s ancestors from the highest generation down and returns the
    /// first that is also an ancestor of `a`. Ties are broken by id so every
    /// replica picks the same base.
    ///
    /// # Errors
    ///
    /// Returns an error if a commit on the walk cannot be loaded.
    pub fn lowest_common_ancestor(&self, a: &CommitId, b: &CommitId) -> CoreResult<Option<CommitId>> {
        let mut candidates = self.ancestors(b)?;
        candidates.sort_by(|x, y| {
            y.generation()
                .cmp(&x.generation())
                .then_with(|| x.id().cmp(y.id()))
        });
        for candidate in candidates {
            if self.is_ancestor(candidate.id(), a)? {
                return Ok(Some(*candidate.id()));
            }
        }
        Ok(None)
    }
}

//! Commits and the commit graph.
//!
//! A commit is an immutable snapshot of a page: its parents, a timestamp,
//! its generation (distance from the root) and the identifier of its entry
//! set. The commit is serialized deterministically and stored as an object;
//! its [`CommitId`] is that object's digest, so commits form a Merkle DAG.

mod graph;

pub use graph::{CommitGraph, CommitState};

use crate::cbor;
use crate::entries::EntrySet;
use crate::error::{CoreError, CoreResult};
use crate::keys::{decode_hex, encode_hex};
use crate::object::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a commit: the SHA-256 of its serialized content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId([u8; 32]);

impl CommitId {
    /// Creates a commit ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the 64-character lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Parses the hex form.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let bytes: [u8; 32] = decode_hex(hex.as_bytes())?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..16])
    }
}

#[derive(Serialize, Deserialize)]
struct CommitContent {
    parents: Vec<CommitId>,
    timestamp: u64,
    generation: u64,
    root: ObjectIdentifier,
}

/// An immutable commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    id: CommitId,
    parents: Vec<CommitId>,
    timestamp: u64,
    generation: u64,
    root: ObjectIdentifier,
    encoded: Vec<u8>,
}

impl Commit {
    /// Builds a commit and computes its id.
    ///
    /// Parents are sorted so the id does not depend on their order.
    ///
    /// # Errors
    ///
    /// Returns an error if more than two distinct parents are given.
    pub fn new(
        mut parents: Vec<CommitId>,
        timestamp: u64,
        generation: u64,
        root: ObjectIdentifier,
    ) -> CoreResult<Self> {
        parents.sort();
        parents.dedup();
        if parents.len() > 2 {
            return Err(CoreError::malformed_commit(format!(
                "{} parents, at most 2 allowed",
                parents.len()
            )));
        }
        let content = CommitContent {
            parents,
            timestamp,
            generation,
            root,
        };
        let encoded = cbor::to_vec(&content)?;
        Ok(Self::from_content(content, encoded))
    }

    fn from_content(content: CommitContent, encoded: Vec<u8>) -> Self {
        let id = CommitId(*ObjectIdentifier::of(&encoded).digest());
        Self {
            id,
            parents: content.parents,
            timestamp: content.timestamp,
            generation: content.generation,
            root: content.root,
            encoded,
        }
    }

    /// Returns the root commit every page starts from.
    ///
    /// It has no parents, timestamp and generation 0, and the empty entry
    /// set, so every replica of every page shares it.
    ///
    /// # Errors
    ///
    /// Returns an error only if encoding fails.
    pub fn root() -> CoreResult<Self> {
        Self::new(Vec::new(), 0, 0, EntrySet::new().object_id()?)
    }

    /// Decodes a serialized commit and recomputes its id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedCommit`] if the bytes are undecodable
    /// or not in canonical form.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let content: CommitContent = ciborium::from_reader(bytes)
            .map_err(|e| CoreError::malformed_commit(format!("undecodable commit: {e}")))?;
        let commit = Self::new(
            content.parents,
            content.timestamp,
            content.generation,
            content.root,
        )?;
        if commit.encoded != bytes {
            return Err(CoreError::malformed_commit("commit is not canonically encoded"));
        }
        Ok(commit)
    }

    /// Decodes a commit received under a claimed id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedCommit`] if the bytes do not decode or
    /// do not hash to `id`.
    pub fn decode_verified(id: &CommitId, bytes: &[u8]) -> CoreResult<Self> {
        let commit = Self::decode(bytes)?;
        if commit.id != *id {
            return Err(CoreError::malformed_commit(format!(
                "commit claimed as {id} hashes to {}",
                commit.id
            )));
        }
        Ok(commit)
    }

    /// Returns the commit id.
    #[must_use]
    pub fn id(&self) -> &CommitId {
        &self.id
    }

    /// Returns the parents, sorted.
    #[must_use]
    pub fn parents(&self) -> &[CommitId] {
        &self.parents
    }

    /// Returns the timestamp in milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the generation: 0 for the root, else max parent generation + 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the identifier of the commit's entry set.
    #[must_use]
    pub fn root_object(&self) -> &ObjectIdentifier {
        &self.root
    }

    /// Returns true for commits with two parents.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() == 2
    }

    /// Returns the serialized form.
    #[must_use]
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Returns the identifier of the commit as a stored object.
    #[must_use]
    pub fn object_id(&self) -> ObjectIdentifier {
        ObjectIdentifier::from_parts(self.id.0, self.encoded.len() as u64)
    }

    /// Orders heads from oldest to newest: timestamp, then id.
    #[must_use]
    pub fn age_key(&self) -> (u64, CommitId) {
        (self.timestamp, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root_id(n: u8) -> ObjectIdentifier {
        ObjectIdentifier::of(&[n])
    }

    #[test]
    fn id_ignores_parent_order() {
        let a = CommitId::from_bytes([1; 32]);
        let b = CommitId::from_bytes([2; 32]);
        let c1 = Commit::new(vec![a, b], 5, 3, root_id(0)).unwrap();
        let c2 = Commit::new(vec![b, a], 5, 3, root_id(0)).unwrap();
        assert_eq!(c1.id(), c2.id());
        assert!(c1.is_merge());
    }

    #[test]
    fn too_many_parents_rejected() {
        let parents = (1..=3).map(|n| CommitId::from_bytes([n; 32])).collect();
        assert!(Commit::new(parents, 0, 1, root_id(0)).is_err());
    }

    #[test]
    fn root_commit_is_shared() {
        let a = Commit::root().unwrap();
        let b = Commit::root().unwrap();
        assert_eq!(a.id(), b.id());
        assert!(a.parents().is_empty());
        assert_eq!(a.generation(), 0);
    }

    #[test]
    fn decode_verified_detects_wrong_id() {
        let commit = Commit::new(vec![], 1, 0, root_id(1)).unwrap();
        let decoded = Commit::decode_verified(commit.id(), commit.encoded()).unwrap();
        assert_eq!(decoded, commit);

        let wrong = CommitId::from_bytes([9; 32]);
        assert!(matches!(
            Commit::decode_verified(&wrong, commit.encoded()),
            Err(CoreError::MalformedCommit { .. })
        ));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let commit = Commit::new(vec![], 1, 0, root_id(1)).unwrap();
        let mut bytes = commit.encoded().to_vec();
        bytes.push(0);
        assert!(Commit::decode(&bytes).is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let id = CommitId::from_bytes([0xcd; 32]);
        assert_eq!(CommitId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(CommitId::from_hex("cd"), None);
    }

    proptest! {
        #[test]
        fn id_is_pure_function_of_content(
            parent in any::<[u8; 32]>(),
            timestamp in any::<u64>(),
            generation in 1u64..1000,
            root in any::<u8>(),
        ) {
            let parents = vec![CommitId::from_bytes(parent)];
            let a = Commit::new(parents.clone(), timestamp, generation, root_id(root)).unwrap();
            let b = Commit::new(parents, timestamp, generation, root_id(root)).unwrap();
            prop_assert_eq!(a.id(), b.id());

            let other = Commit::new(a.parents().to_vec(), timestamp.wrapping_add(1), generation, root_id(root)).unwrap();
            prop_assert_ne!(a.id(), other.id());
        }
    }
}

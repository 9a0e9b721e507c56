//! Content identifiers.

use crate::keys::encode_hex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of an immutable object: SHA-256 of the full content plus its
/// length.
///
/// Identifiers are a pure function of the bytes. Two objects with equal
/// content always have equal identifiers, and the identifier of a fragmented
/// object is still the hash of the whole value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    digest: [u8; 32],
    size: u64,
}

impl ObjectIdentifier {
    /// Computes the identifier of `content`.
    #[must_use]
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(content);
        hasher.finish()
    }

    /// Builds an identifier from a digest and size received elsewhere.
    #[must_use]
    pub const fn from_parts(digest: [u8; 32], size: u64) -> Self {
        Self { digest, size }
    }

    /// Returns the SHA-256 digest.
    #[must_use]
    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Returns the content length in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Returns the digest as 64 lowercase hex characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        encode_hex(&self.digest)
    }
}

impl fmt::Debug for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentifier({}.., {} bytes)", &self.to_hex()[..12], self.size)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.to_hex(), self.size)
    }
}

/// Incremental SHA-256 that also counts bytes.
#[derive(Clone, Default)]
pub struct ContentHasher {
    hasher: Sha256,
    size: u64,
}

impl ContentHasher {
    /// Creates a hasher for empty content.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next bytes of the content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Returns how many bytes have been fed.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finishes hashing.
    #[must_use]
    pub fn finish(self) -> ObjectIdentifier {
        ObjectIdentifier {
            digest: self.hasher.finalize().into(),
            size: self.size,
        }
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher")
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_content_has_known_digest() {
        let id = ObjectIdentifier::of(b"");
        assert_eq!(id.size(), 0);
        assert_eq!(
            id.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn chunked_hash_matches_whole() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.size(), 11);
        assert_eq!(hasher.finish(), ObjectIdentifier::of(b"hello world"));
    }

    proptest! {
        #[test]
        fn identifiers_equal_iff_content_equal(
            a in prop::collection::vec(any::<u8>(), 0..128),
            b in prop::collection::vec(any::<u8>(), 0..128),
        ) {
            prop_assert_eq!(ObjectIdentifier::of(&a) == ObjectIdentifier::of(&b), a == b);
        }
    }
}

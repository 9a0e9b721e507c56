//! Row key layout of a page inside the local ordered store.
//!
//! This is the only module that knows how page rows are spelled. Everything
//! else asks it for keys and prefixes.
//!
//! ```text
//! /page/<32 hex page id>/
//!   __METADATA                  page exists
//!   reference/<entry key>       entry key -> object (current head)
//!   value/<64 hex digest>       object contents (inline or fragment index)
//!   commit/<64 hex id>          finalized commit index
//!   head/<64 hex id>            head marker
//!   pending/<64 hex id>         commit waiting for missing parents
//!   unsynced/<64 hex id>        local commit not yet acknowledged remotely
//!   sync/cursor                 remote log cursor
//! ```
//!
//! The page id has a fixed width and is terminated by `/`, so no key of one
//! page is a prefix of, or shares a prefix range with, a key of another.

use crate::commit::CommitId;
use crate::object::ObjectIdentifier;
use crate::types::PageId;

/// Common prefix of every page row.
pub const PAGE_ROOT: &[u8] = b"/page/";

const METADATA: &[u8] = b"__METADATA";
const REFERENCE: &[u8] = b"reference/";
const VALUE: &[u8] = b"value/";
const COMMIT: &[u8] = b"commit/";
const HEAD: &[u8] = b"head/";
const PENDING: &[u8] = b"pending/";
const UNSYNCED: &[u8] = b"unsynced/";
const SYNC_CURSOR: &[u8] = b"sync/cursor";

const PAGE_HEX_LEN: usize = 32;
const DIGEST_HEX_LEN: usize = 64;

/// Returns the prefix shared by every row of `page`.
#[must_use]
pub fn page_prefix(page: &PageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(PAGE_ROOT.len() + PAGE_HEX_LEN + 1);
    key.extend_from_slice(PAGE_ROOT);
    key.extend_from_slice(page.to_hex().as_bytes());
    key.push(b'/');
    key
}

fn family_key(page: &PageId, family: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = page_prefix(page);
    key.extend_from_slice(family);
    key.extend_from_slice(suffix);
    key
}

/// Returns the sentinel row marking that `page` has been created.
#[must_use]
pub fn metadata_row_key(page: &PageId) -> Vec<u8> {
    family_key(page, METADATA, b"")
}

/// Returns the prefix of every reference row of `page`.
#[must_use]
pub fn reference_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, REFERENCE, b"")
}

/// Returns the reference row for `entry_key`.
#[must_use]
pub fn reference_row_key(page: &PageId, entry_key: &[u8]) -> Vec<u8> {
    family_key(page, REFERENCE, entry_key)
}

/// Recovers the entry key from a reference row key.
///
/// Returns `None` if `row` is not a reference row of any page.
#[must_use]
pub fn entry_key_from_reference_row_key(row: &[u8]) -> Option<Vec<u8>> {
    let rest = strip_page(row)?;
    rest.strip_prefix(REFERENCE).map(<[u8]>::to_vec)
}

/// Returns the prefix of every value row of `page`.
#[must_use]
pub fn value_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, VALUE, b"")
}

/// Returns the value row holding the contents of `id`.
///
/// Derived from the digest only, so every entry sharing the content shares
/// the row.
#[must_use]
pub fn value_row_key(page: &PageId, id: &ObjectIdentifier) -> Vec<u8> {
    value_row_key_for_digest(page, id.digest())
}

/// Returns the value row for a raw digest.
#[must_use]
pub fn value_row_key_for_digest(page: &PageId, digest: &[u8; 32]) -> Vec<u8> {
    family_key(page, VALUE, encode_hex(digest).as_bytes())
}

/// Returns the prefix of the finalized commit index of `page`.
#[must_use]
pub fn commit_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, COMMIT, b"")
}

/// Returns the finalized commit index row for `id`.
#[must_use]
pub fn commit_row_key(page: &PageId, id: &CommitId) -> Vec<u8> {
    family_key(page, COMMIT, id.to_hex().as_bytes())
}

/// Returns the prefix of the head markers of `page`.
#[must_use]
pub fn head_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, HEAD, b"")
}

/// Returns the head marker row for `id`.
#[must_use]
pub fn head_row_key(page: &PageId, id: &CommitId) -> Vec<u8> {
    family_key(page, HEAD, id.to_hex().as_bytes())
}

/// Returns the prefix of buffered out-of-order commits of `page`.
#[must_use]
pub fn pending_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, PENDING, b"")
}

/// Returns the buffered commit row for `id`.
#[must_use]
pub fn pending_row_key(page: &PageId, id: &CommitId) -> Vec<u8> {
    family_key(page, PENDING, id.to_hex().as_bytes())
}

/// Returns the prefix of local commits awaiting upload.
#[must_use]
pub fn unsynced_prefix(page: &PageId) -> Vec<u8> {
    family_key(page, UNSYNCED, b"")
}

/// Returns the upload marker row for `id`.
#[must_use]
pub fn unsynced_row_key(page: &PageId, id: &CommitId) -> Vec<u8> {
    family_key(page, UNSYNCED, id.to_hex().as_bytes())
}

/// Returns the row holding the remote log cursor of `page`.
#[must_use]
pub fn sync_cursor_row_key(page: &PageId) -> Vec<u8> {
    family_key(page, SYNC_CURSOR, b"")
}

/// Parses the 32-byte digest at the end of a row key under `prefix`.
///
/// Returns `None` if `row` is not under `prefix` or the suffix is not a
/// 64-character hex digest.
#[must_use]
pub fn digest_from_row_key(prefix: &[u8], row: &[u8]) -> Option<[u8; 32]> {
    let suffix = row.strip_prefix(prefix)?;
    if suffix.len() != DIGEST_HEX_LEN {
        return None;
    }
    decode_hex(suffix)?.try_into().ok()
}

/// Returns the page a row key belongs to, if it is a page row.
#[must_use]
pub fn page_id_from_row_key(row: &[u8]) -> Option<PageId> {
    let rest = row.strip_prefix(PAGE_ROOT)?;
    if rest.len() <= PAGE_HEX_LEN || rest[PAGE_HEX_LEN] != b'/' {
        return None;
    }
    let bytes: [u8; 16] = decode_hex(&rest[..PAGE_HEX_LEN])?.try_into().ok()?;
    Some(PageId::from_bytes(bytes))
}

fn strip_page(row: &[u8]) -> Option<&[u8]> {
    page_id_from_row_key(row)?;
    Some(&row[PAGE_ROOT.len() + PAGE_HEX_LEN + 1..])
}

/// Lowercase hex encoding.
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decodes lowercase or uppercase hex; `None` on odd length or bad digits.
#[must_use]
pub fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2)
        .map(|pair| Some((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn layout_is_readable() {
        let page = PageId::from_bytes([0x11; 16]);
        let key = reference_row_key(&page, b"k");
        assert_eq!(
            key,
            format!("/page/{}/reference/k", "11".repeat(16)).into_bytes()
        );
        assert_eq!(
            metadata_row_key(&page),
            format!("/page/{}/__METADATA", "11".repeat(16)).into_bytes()
        );
    }

    #[test]
    fn value_row_depends_only_on_digest() {
        let page = PageId::new();
        let id = ObjectIdentifier::of(b"shared");
        let key = value_row_key(&page, &id);
        assert!(key.starts_with(&value_prefix(&page)));
        assert_eq!(
            digest_from_row_key(&value_prefix(&page), &key),
            Some(*id.digest())
        );
    }

    #[test]
    fn non_reference_rows_are_rejected() {
        let page = PageId::new();
        assert_eq!(entry_key_from_reference_row_key(&metadata_row_key(&page)), None);
        assert_eq!(entry_key_from_reference_row_key(b"/page/short/reference/k"), None);
        assert_eq!(entry_key_from_reference_row_key(b"reference/k"), None);
    }

    #[test]
    fn digest_parse_rejects_bad_suffix() {
        let page = PageId::new();
        let prefix = head_prefix(&page);
        let mut row = prefix.clone();
        row.extend_from_slice(b"not-hex");
        assert_eq!(digest_from_row_key(&prefix, &row), None);
    }

    #[test]
    fn page_id_is_recovered_from_any_row() {
        let page = PageId::new();
        assert_eq!(page_id_from_row_key(&sync_cursor_row_key(&page)), Some(page));
        assert_eq!(page_id_from_row_key(b"/other/row"), None);
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(encode_hex(&[0x00, 0xff, 0x1a]), "00ff1a");
        assert_eq!(decode_hex(b"00FF1a"), Some(vec![0x00, 0xff, 0x1a]));
        assert_eq!(decode_hex(b"abc"), None);
        assert_eq!(decode_hex(b"zz"), None);
    }

    proptest! {
        #[test]
        fn reference_row_roundtrip(
            page in any::<[u8; 16]>(),
            entry_key in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let page = PageId::from_bytes(page);
            let row = reference_row_key(&page, &entry_key);
            prop_assert_eq!(entry_key_from_reference_row_key(&row), Some(entry_key));
            prop_assert!(row.starts_with(&page_prefix(&page)));
        }

        #[test]
        fn pages_are_disjoint(
            a in any::<[u8; 16]>(),
            b in any::<[u8; 16]>(),
            key in prop::collection::vec(any::<u8>(), 0..32),
        ) {
            prop_assume!(a != b);
            let a = PageId::from_bytes(a);
            let b = PageId::from_bytes(b);
            let prefix_b = page_prefix(&b);
            prop_assert!(!reference_row_key(&a, &key).starts_with(&prefix_b));
            prop_assert!(!metadata_row_key(&a).starts_with(&prefix_b));
            prop_assert!(!sync_cursor_row_key(&a).starts_with(&prefix_b));
            prop_assert!(!page_prefix(&a).starts_with(&prefix_b));
        }
    }
}

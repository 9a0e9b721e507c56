//! Entries and the key-sorted entry sets that form commit roots.

use crate::cbor;
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectIdentifier;
use crate::types::KeyPriority;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// The value side of an entry: which object holds it and how eagerly it
/// must be resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Object holding the value.
    pub object: ObjectIdentifier,
    /// Residency requirement.
    pub priority: KeyPriority,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(object: ObjectIdentifier, priority: KeyPriority) -> Self {
        Self { object, priority }
    }

    /// Creates an eager entry.
    #[must_use]
    pub const fn eager(object: ObjectIdentifier) -> Self {
        Self::new(object, KeyPriority::Eager)
    }
}

/// A change to one key. `entry == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChange {
    /// The entry key.
    pub key: Vec<u8>,
    /// New entry, or `None` if the key was deleted.
    pub entry: Option<Entry>,
}

impl EntryChange {
    /// Returns true if this change deletes the key.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.entry.is_none()
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    key: Vec<u8>,
    object: ObjectIdentifier,
    priority: KeyPriority,
}

/// The full key space of a page at one commit.
///
/// Entry sets never contain tombstones. Their serialized form is a
/// key-sorted CBOR list, so equal sets always produce identical bytes and
/// therefore identical root identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntrySet {
    entries: BTreeMap<Vec<u8>, Entry>,
}

impl EntrySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Inserts or replaces the entry for `key`.
    pub fn insert(&mut self, key: Vec<u8>, entry: Entry) -> Option<Entry> {
        self.entries.insert(key, entry)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.entries.remove(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, Vec<u8>, Entry> {
        self.entries.iter()
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> btree_map::Keys<'_, Vec<u8>, Entry> {
        self.entries.keys()
    }

    /// Applies a list of changes in order.
    pub fn apply(&mut self, changes: &[EntryChange]) {
        for change in changes {
            match change.entry {
                Some(entry) => {
                    self.entries.insert(change.key.clone(), entry);
                }
                None => {
                    self.entries.remove(&change.key);
                }
            }
        }
    }

    /// Returns the changes that turn `self` into `target`, in key order.
    #[must_use]
    pub fn diff(&self, target: &EntrySet) -> Vec<EntryChange> {
        let mut changes = Vec::new();
        for (key, entry) in &self.entries {
            match target.entries.get(key) {
                Some(new) if new == entry => {}
                Some(new) => changes.push(EntryChange {
                    key: key.clone(),
                    entry: Some(*new),
                }),
                None => changes.push(EntryChange {
                    key: key.clone(),
                    entry: None,
                }),
            }
        }
        for (key, entry) in &target.entries {
            if !self.entries.contains_key(key) {
                changes.push(EntryChange {
                    key: key.clone(),
                    entry: Some(*entry),
                });
            }
        }
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        changes
    }

    /// Serializes the set.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let records: Vec<EntryRecord> = self
            .entries
            .iter()
            .map(|(key, entry)| EntryRecord {
                key: key.clone(),
                object: entry.object,
                priority: entry.priority,
            })
            .collect();
        cbor::to_vec(&records)
    }

    /// Deserializes a set, rejecting unsorted or duplicate keys.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedObject`] for undecodable or
    /// non-canonical input.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let records: Vec<EntryRecord> = cbor::from_slice(bytes, "entry set")?;
        let mut entries = BTreeMap::new();
        let mut previous: Option<&[u8]> = None;
        for record in &records {
            if previous.is_some_and(|prev| prev >= record.key.as_slice()) {
                return Err(CoreError::malformed_object("entry set keys out of order"));
            }
            previous = Some(&record.key);
        }
        for record in records {
            entries.insert(record.key, Entry::new(record.object, record.priority));
        }
        Ok(Self { entries })
    }

    /// Returns the identifier this set is stored under.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn object_id(&self) -> CoreResult<ObjectIdentifier> {
        Ok(ObjectIdentifier::of(&self.to_bytes()?))
    }
}

impl FromIterator<(Vec<u8>, Entry)> for EntrySet {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Entry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a EntrySet {
    type Item = (&'a Vec<u8>, &'a Entry);
    type IntoIter = btree_map::Iter<'a, Vec<u8>, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(content: &[u8]) -> Entry {
        Entry::eager(ObjectIdentifier::of(content))
    }

    #[test]
    fn equal_sets_serialize_identically() {
        let mut a = EntrySet::new();
        a.insert(b"x".to_vec(), entry(b"1"));
        a.insert(b"y".to_vec(), entry(b"2"));

        let mut b = EntrySet::new();
        b.insert(b"y".to_vec(), entry(b"2"));
        b.insert(b"x".to_vec(), entry(b"1"));

        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
        assert_eq!(EntrySet::from_bytes(&a.to_bytes().unwrap()).unwrap(), a);
    }

    #[test]
    fn empty_set_has_stable_id() {
        assert_eq!(
            EntrySet::new().object_id().unwrap(),
            EntrySet::new().object_id().unwrap()
        );
    }

    #[test]
    fn from_bytes_rejects_unsorted_records() {
        let records = vec![
            EntryRecord {
                key: b"b".to_vec(),
                object: ObjectIdentifier::of(b"1"),
                priority: KeyPriority::Eager,
            },
            EntryRecord {
                key: b"a".to_vec(),
                object: ObjectIdentifier::of(b"2"),
                priority: KeyPriority::Eager,
            },
        ];
        let bytes = cbor::to_vec(&records).unwrap();
        assert!(matches!(
            EntrySet::from_bytes(&bytes),
            Err(CoreError::MalformedObject { .. })
        ));
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(EntrySet::from_bytes(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn diff_reports_puts_and_tombstones() {
        let mut old = EntrySet::new();
        old.insert(b"keep".to_vec(), entry(b"k"));
        old.insert(b"change".to_vec(), entry(b"before"));
        old.insert(b"drop".to_vec(), entry(b"d"));

        let mut new = EntrySet::new();
        new.insert(b"keep".to_vec(), entry(b"k"));
        new.insert(b"change".to_vec(), entry(b"after"));
        new.insert(b"add".to_vec(), entry(b"a"));

        let changes = old.diff(&new);
        let keys: Vec<&[u8]> = changes.iter().map(|c| c.key.as_slice()).collect();
        assert_eq!(keys, vec![b"add".as_slice(), b"change", b"drop"]);
        assert!(changes[2].is_deletion());
    }

    proptest! {
        #[test]
        fn apply_diff_reaches_target(
            old in prop::collection::btree_map(
                prop::collection::vec(0u8..8, 1..3), any::<u8>(), 0..12),
            new in prop::collection::btree_map(
                prop::collection::vec(0u8..8, 1..3), any::<u8>(), 0..12),
        ) {
            let build = |map: &BTreeMap<Vec<u8>, u8>| -> EntrySet {
                map.iter().map(|(k, v)| (k.clone(), entry(&[*v]))).collect()
            };
            let old = build(&old);
            let new = build(&new);

            let mut patched = old.clone();
            patched.apply(&old.diff(&new));
            prop_assert_eq!(patched, new);
        }
    }
}

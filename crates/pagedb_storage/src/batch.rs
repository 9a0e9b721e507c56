//! Atomic write batches.

use std::collections::BTreeMap;

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a row.
    Put {
        /// Row key.
        key: Vec<u8>,
        /// Row value.
        value: Vec<u8>,
    },
    /// Remove a row (no-op when absent).
    Delete {
        /// Row key.
        key: Vec<u8>,
    },
    /// Remove every row whose key starts with `prefix`.
    DeletePrefix {
        /// Key prefix.
        prefix: Vec<u8>,
    },
}

/// An ordered list of writes applied all-or-nothing.
///
/// Operations are applied in insertion order, so a `Put` after a
/// `DeletePrefix` covering the same key survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Queues a prefix-range delete.
    pub fn delete_prefix(&mut self, prefix: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::DeletePrefix {
            prefix: prefix.into(),
        });
        self
    }

    /// Appends every operation of `other` after the ones already queued.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the queued operations.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Looks up the value this batch would leave for `key`, if it touches it.
    ///
    /// Returns `Some(None)` when the batch deletes the key and `None` when
    /// the batch does not mention it.
    #[must_use]
    pub fn pending_value(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        let mut result = None;
        for op in &self.ops {
            match op {
                BatchOp::Put { key: k, value } if k == key => result = Some(Some(value.as_slice())),
                BatchOp::Delete { key: k } if k == key => result = Some(None),
                BatchOp::DeletePrefix { prefix } if key.starts_with(prefix) => result = Some(None),
                _ => {}
            }
        }
        result
    }

    pub(crate) fn apply_to(&self, map: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
                BatchOp::DeletePrefix { prefix } => {
                    let doomed: Vec<Vec<u8>> = map
                        .range(prefix.clone()..)
                        .take_while(|(k, _)| k.starts_with(prefix))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in doomed {
                        map.remove(&key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_respects_op_order() {
        let mut map = BTreeMap::new();
        map.insert(b"p/1".to_vec(), b"old".to_vec());
        map.insert(b"p/2".to_vec(), b"old".to_vec());
        map.insert(b"q/1".to_vec(), b"keep".to_vec());

        let mut batch = WriteBatch::new();
        batch.delete_prefix(b"p/".to_vec());
        batch.put(b"p/2".to_vec(), b"new".to_vec());
        batch.apply_to(&mut map);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(b"p/2".as_slice()), Some(&b"new".to_vec()));
        assert!(map.contains_key(b"q/1".as_slice()));
    }

    #[test]
    fn pending_value_tracks_last_write() {
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        assert_eq!(batch.pending_value(b"k"), Some(Some(b"1".as_slice())));

        batch.delete_prefix(b"k".to_vec());
        assert_eq!(batch.pending_value(b"k"), Some(None));
        assert_eq!(batch.pending_value(b"other"), None);
    }
}

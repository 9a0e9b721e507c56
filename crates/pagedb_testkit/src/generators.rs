//! Property-based test generators using proptest.
//!
//! Provides strategies for entry keys, values and journal operations.

use pagedb_core::{KeyPriority, Page, PageId};
use proptest::prelude::*;

/// One journal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    /// Set a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key.
    Delete(Vec<u8>),
}

/// Strategy for generating page ids.
pub fn page_id_strategy() -> impl Strategy<Value = PageId> {
    prop::array::uniform16(any::<u8>()).prop_map(PageId::from_bytes)
}

/// Strategy for entry keys from a small alphabet, so keys collide often.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'f', 1..4)
}

/// Strategy for arbitrary entry values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for entry priorities.
pub fn priority_strategy() -> impl Strategy<Value = KeyPriority> {
    prop_oneof![Just(KeyPriority::Eager), Just(KeyPriority::Lazy)]
}

/// Strategy for one journal operation, mostly puts.
pub fn journal_op_strategy() -> impl Strategy<Value = JournalOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| JournalOp::Put(k, v)),
        1 => key_strategy().prop_map(JournalOp::Delete),
    ]
}

/// Strategy for a sequence of journals, each a short list of operations.
pub fn journals_strategy(max_journals: usize) -> impl Strategy<Value = Vec<Vec<JournalOp>>> {
    prop::collection::vec(
        prop::collection::vec(journal_op_strategy(), 1..4),
        1..=max_journals.max(1),
    )
}

/// Applies `ops` as one journal. Returns true if a commit was made.
pub fn apply_journal(page: &Page, ops: &[JournalOp]) -> bool {
    let mut journal = page.begin();
    for op in ops {
        match op {
            JournalOp::Put(key, value) => {
                journal.put(key.clone(), value).expect("Failed to stage put");
            }
            JournalOp::Delete(key) => journal.delete(key.clone()),
        }
    }
    journal.commit().expect("Failed to commit").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestPage;

    proptest! {
        #[test]
        fn generated_journals_apply(journals in journals_strategy(5)) {
            let fixture = TestPage::memory();
            for ops in &journals {
                apply_journal(&fixture, ops);
            }
            prop_assert!(fixture.is_converged().unwrap());
        }

        #[test]
        fn keys_are_short_and_lowercase(key in key_strategy()) {
            prop_assert!(!key.is_empty() && key.len() < 4);
            prop_assert!(key.iter().all(|b| (b'a'..=b'f').contains(b)));
        }
    }
}

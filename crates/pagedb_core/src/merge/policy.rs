//! Merge policies and the three-way entry merge.

use crate::commit::{Commit, CommitId};
use crate::entries::EntrySet;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Outcome of a merge policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// The merged entry set to commit on top of both heads.
    Merged(EntrySet),
    /// The policy refuses to merge; the page stays multi-headed.
    Decline,
}

/// Everything a policy sees when two heads diverge.
///
/// `left` is the older head and `right` the newer one (by timestamp, then
/// commit id), so every replica presents the same conflict the same way.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    /// The lowest common ancestor.
    pub base_commit: CommitId,
    /// Entries at the common ancestor.
    pub base: EntrySet,
    /// The older head.
    pub left_commit: Commit,
    /// Entries at the older head.
    pub left: EntrySet,
    /// The newer head.
    pub right_commit: Commit,
    /// Entries at the newer head.
    pub right: EntrySet,
    /// Keys changed differently on both sides since the base.
    pub conflicting_keys: Vec<Vec<u8>>,
}

/// A pluggable merge decision.
///
/// Resolvers may do asynchronous work (ask a user, call a service). A
/// resolver that fails should return [`MergeDecision::Decline`].
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Decides how to merge a conflict.
    async fn resolve(&self, conflict: &MergeConflict) -> MergeDecision;
}

/// A resolver backed by a plain function.
pub struct FnResolver<F>(pub F);

#[async_trait]
impl<F> ConflictResolver for FnResolver<F>
where
    F: Fn(&MergeConflict) -> MergeDecision + Send + Sync,
{
    async fn resolve(&self, conflict: &MergeConflict) -> MergeDecision {
        (self.0)(conflict)
    }
}

/// How a page reconciles divergent heads.
#[derive(Clone, Default)]
pub enum MergePolicy {
    /// Per-key three-way merge; keys changed on both sides take the newer
    /// head's value.
    #[default]
    LastOneWins,
    /// Three-way merge when no key conflicts; otherwise ask the resolver.
    AutomaticWithFallback(Arc<dyn ConflictResolver>),
    /// Always ask the resolver.
    Custom(Arc<dyn ConflictResolver>),
    /// Never merge automatically.
    None,
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePolicy::LastOneWins => f.write_str("LastOneWins"),
            MergePolicy::AutomaticWithFallback(_) => f.write_str("AutomaticWithFallback(..)"),
            MergePolicy::Custom(_) => f.write_str("Custom(..)"),
            MergePolicy::None => f.write_str("None"),
        }
    }
}

impl MergePolicy {
    /// Applies the policy to a conflict.
    pub async fn decide(&self, conflict: &MergeConflict) -> MergeDecision {
        match self {
            MergePolicy::LastOneWins => {
                MergeDecision::Merged(three_way_merge(&conflict.base, &conflict.left, &conflict.right).merged)
            }
            MergePolicy::AutomaticWithFallback(resolver) => {
                if conflict.conflicting_keys.is_empty() {
                    MergeDecision::Merged(
                        three_way_merge(&conflict.base, &conflict.left, &conflict.right).merged,
                    )
                } else {
                    resolver.resolve(conflict).await
                }
            }
            MergePolicy::Custom(resolver) => resolver.resolve(conflict).await,
            MergePolicy::None => MergeDecision::Decline,
        }
    }
}

/// Result of [`three_way_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayMerge {
    /// Merged entries; conflicting keys hold the right side's state.
    pub merged: EntrySet,
    /// Keys changed differently on both sides.
    pub conflicts: Vec<Vec<u8>>,
}

/// Merges two entry sets against their common base, key by key.
///
/// A key changed on one side only takes that side's state. A key changed
/// identically on both sides takes that state. A key changed differently
/// on both sides is a conflict and takes the right side's state (which may
/// be a deletion).
#[must_use]
pub fn three_way_merge(base: &EntrySet, left: &EntrySet, right: &EntrySet) -> ThreeWayMerge {
    let keys: BTreeSet<&Vec<u8>> = base.keys().chain(left.keys()).chain(right.keys()).collect();
    let mut merged = EntrySet::new();
    let mut conflicts = Vec::new();

    for key in keys {
        let b = base.get(key);
        let l = left.get(key);
        let r = right.get(key);
        let chosen = if l == r || l == b {
            r
        } else if r == b {
            l
        } else {
            conflicts.push(key.clone());
            r
        };
        if let Some(entry) = chosen {
            merged.insert(key.clone(), *entry);
        }
    }

    ThreeWayMerge { merged, conflicts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::Entry;
    use crate::object::ObjectIdentifier;

    fn set(pairs: &[(&str, &str)]) -> EntrySet {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), Entry::eager(ObjectIdentifier::of(v.as_bytes()))))
            .collect()
    }

    fn conflict(base: EntrySet, left: EntrySet, right: EntrySet) -> MergeConflict {
        let conflicting_keys = three_way_merge(&base, &left, &right).conflicts;
        let root = ObjectIdentifier::of(b"root");
        MergeConflict {
            base_commit: CommitId::from_bytes([0; 32]),
            base,
            left_commit: Commit::new(vec![CommitId::from_bytes([1; 32])], 1, 1, root).unwrap(),
            left,
            right_commit: Commit::new(vec![CommitId::from_bytes([1; 32])], 2, 1, root).unwrap(),
            right,
            conflicting_keys,
        }
    }

    #[test]
    fn disjoint_edits_combine() {
        let base = set(&[("k", "v1")]);
        let left = set(&[("k", "v2")]);
        let right = set(&[("k", "v1"), ("m", "x")]);
        let result = three_way_merge(&base, &left, &right);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.merged, set(&[("k", "v2"), ("m", "x")]));
    }

    #[test]
    fn one_sided_delete_wins_over_unchanged() {
        let base = set(&[("k", "v"), ("j", "w")]);
        let left = set(&[("j", "w")]);
        let right = set(&[("k", "v"), ("j", "w")]);
        let result = three_way_merge(&base, &left, &right);
        assert_eq!(result.merged, set(&[("j", "w")]));
    }

    #[test]
    fn conflicting_edit_takes_right() {
        let base = set(&[("k", "v")]);
        let left = set(&[("k", "left")]);
        let right = set(&[("k", "right")]);
        let result = three_way_merge(&base, &left, &right);
        assert_eq!(result.conflicts, vec![b"k".to_vec()]);
        assert_eq!(result.merged, set(&[("k", "right")]));
    }

    #[test]
    fn identical_edits_do_not_conflict() {
        let base = set(&[]);
        let both = set(&[("k", "same")]);
        let result = three_way_merge(&base, &both, &both);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.merged, both);
    }

    #[tokio::test]
    async fn none_policy_declines() {
        let c = conflict(set(&[]), set(&[("a", "1")]), set(&[("b", "2")]));
        assert_eq!(MergePolicy::None.decide(&c).await, MergeDecision::Decline);
    }

    #[tokio::test]
    async fn fallback_only_consulted_on_conflict() {
        let resolver: Arc<dyn ConflictResolver> =
            Arc::new(FnResolver(|_: &MergeConflict| MergeDecision::Decline));
        let policy = MergePolicy::AutomaticWithFallback(resolver);

        let clean = conflict(set(&[]), set(&[("a", "1")]), set(&[("b", "2")]));
        assert_eq!(
            policy.decide(&clean).await,
            MergeDecision::Merged(set(&[("a", "1"), ("b", "2")]))
        );

        let clash = conflict(set(&[]), set(&[("a", "1")]), set(&[("a", "2")]));
        assert_eq!(policy.decide(&clash).await, MergeDecision::Decline);
    }

    #[tokio::test]
    async fn custom_policy_result_is_used_verbatim() {
        let chosen = set(&[("only", "this")]);
        let expected = chosen.clone();
        let policy = MergePolicy::Custom(Arc::new(FnResolver(move |_: &MergeConflict| {
            MergeDecision::Merged(chosen.clone())
        })));
        let c = conflict(set(&[]), set(&[("a", "1")]), set(&[("b", "2")]));
        assert_eq!(policy.decide(&c).await, MergeDecision::Merged(expected));
    }
}

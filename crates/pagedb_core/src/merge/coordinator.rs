//! Restoring the single-head invariant.

use super::policy::{three_way_merge, MergeConflict, MergeDecision};
use crate::commit::{Commit, CommitId};
use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use tracing::{debug, info};

/// Where a page stands after [`resolve_heads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one head remains.
    Converged(CommitId),
    /// The policy declined; these heads remain, oldest first.
    AwaitingResolution(Vec<CommitId>),
}

/// What [`resolve_heads`] did.
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Merge commits created, in order.
    pub merges: Vec<Commit>,
    /// Final state of the page.
    pub resolution: Resolution,
}

/// Merges heads pairwise until one remains or the policy declines.
///
/// Each round takes the two oldest heads, finds their lowest common
/// ancestor and asks the page's merge policy. The policy runs without the
/// page's write lock held; if either head was superseded meanwhile the
/// round is simply retried. A merge commit has exactly the two heads as
/// parents and timestamp `max(parents) + 1`, so two replicas merging the
/// same pair with a deterministic policy produce the same commit.
///
/// # Errors
///
/// Returns an error if commits or entry sets cannot be loaded or the merge
/// commit cannot be written.
pub async fn resolve_heads(page: &Page) -> CoreResult<MergeReport> {
    let mut merges = Vec::new();
    loop {
        let heads = page.heads()?;
        let (left, right) = match heads.as_slice() {
            [] => return Err(CoreError::invalid_operation("page has no head")),
            [only] => {
                return Ok(MergeReport {
                    merges,
                    resolution: Resolution::Converged(*only.id()),
                })
            }
            [left, right, ..] => (left.clone(), right.clone()),
        };

        let conflict = build_conflict(page, left, right)?;
        debug!(
            page = %page.id(),
            left = %conflict.left_commit.id(),
            right = %conflict.right_commit.id(),
            base = %conflict.base_commit,
            conflicts = conflict.conflicting_keys.len(),
            "merging heads"
        );

        let policy = page.merge_policy();
        match policy.decide(&conflict).await {
            MergeDecision::Merged(entries) => {
                if let Some(commit) =
                    page.commit_merge(&conflict.left_commit, &conflict.right_commit, &entries)?
                {
                    merges.push(commit);
                }
            }
            MergeDecision::Decline => {
                info!(page = %page.id(), heads = heads.len(), ?policy, "merge declined");
                return Ok(MergeReport {
                    merges,
                    resolution: Resolution::AwaitingResolution(
                        heads.iter().map(|h| *h.id()).collect(),
                    ),
                });
            }
        }
    }
}

fn build_conflict(page: &Page, left: Commit, right: Commit) -> CoreResult<MergeConflict> {
    let base_commit = page
        .graph()
        .lowest_common_ancestor(left.id(), right.id())?
        .ok_or_else(|| CoreError::malformed_commit("heads share no ancestor"))?;
    let base = page.entry_set_at(&page.graph().require(&base_commit)?)?;
    let left_entries = page.entry_set_at(&left)?;
    let right_entries = page.entry_set_at(&right)?;
    let conflicting_keys = three_way_merge(&base, &left_entries, &right_entries).conflicts;

    Ok(MergeConflict {
        base_commit,
        base,
        left_commit: left,
        left: left_entries,
        right_commit: right,
        right: right_entries,
        conflicting_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{FnResolver, MergePolicy};
    use crate::page::{PageOptions, ValueLookup};
    use crate::types::{ManualClock, PageId};
    use bytes::Bytes;
    use pagedb_storage::InMemoryStore;
    use std::sync::Arc;

    fn page_with(policy: MergePolicy) -> Page {
        Page::open(
            Arc::new(InMemoryStore::new()),
            PageId::new(),
            PageOptions::new()
                .with_merge_policy(policy)
                .with_clock(Arc::new(ManualClock::new(1_000))),
        )
        .unwrap()
    }

    fn write(page: &Page, key: &str, value: &str) -> Commit {
        let mut journal = page.begin();
        journal.put(key, value.as_bytes()).unwrap();
        journal.commit().unwrap().unwrap()
    }

    /// Copies `commit` and its new objects from `from` into `to`.
    fn deliver(from: &Page, to: &Page, commit: &Commit) {
        for id in from.objects_introduced_by(commit).unwrap() {
            let bytes = from.objects().get(&id).unwrap().unwrap();
            to.store_remote_object(id, &bytes).unwrap();
        }
        to.apply_remote_commits(vec![commit.clone()], None).unwrap();
    }

    fn diverge(policy: MergePolicy) -> (Page, Commit, Commit) {
        let a = page_with(policy);
        let b = page_with(MergePolicy::None);
        let c1 = write(&a, "k", "v1");
        deliver(&a, &b, &c1);

        let c2 = write(&b, "k", "v2");
        let c3 = write(&a, "m", "x");
        deliver(&b, &a, &c2);
        (a, c2, c3)
    }

    #[tokio::test]
    async fn single_head_is_converged() {
        let page = page_with(MergePolicy::LastOneWins);
        write(&page, "k", "v");
        let report = resolve_heads(&page).await.unwrap();
        assert!(report.merges.is_empty());
        assert!(matches!(report.resolution, Resolution::Converged(_)));
    }

    #[tokio::test]
    async fn last_one_wins_merges_disjoint_edits() {
        let (page, c2, c3) = diverge(MergePolicy::LastOneWins);
        assert_eq!(page.heads().unwrap().len(), 2);

        let report = resolve_heads(&page).await.unwrap();
        assert_eq!(report.merges.len(), 1);
        let merge = &report.merges[0];
        let mut parents = vec![*c2.id(), *c3.id()];
        parents.sort();
        assert_eq!(merge.parents(), parents.as_slice());
        assert_eq!(report.resolution, Resolution::Converged(*merge.id()));

        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Found(Bytes::from_static(b"v2")));
        assert_eq!(page.get(b"m").unwrap(), ValueLookup::Found(Bytes::from_static(b"x")));
        assert!(page
            .unsynced_commits()
            .unwrap()
            .iter()
            .any(|c| c.id() == merge.id()));
    }

    #[tokio::test]
    async fn declined_merge_awaits_resolution() {
        let (page, _, _) = diverge(MergePolicy::None);
        let report = resolve_heads(&page).await.unwrap();
        assert!(report.merges.is_empty());
        match report.resolution {
            Resolution::AwaitingResolution(heads) => assert_eq!(heads.len(), 2),
            other => panic!("unexpected resolution {other:?}"),
        }
        // reads follow the newest head
        assert!(page.get(b"k").unwrap().found().is_some());
    }

    #[tokio::test]
    async fn custom_resolver_sees_base_and_heads() {
        let policy = MergePolicy::Custom(Arc::new(FnResolver(|conflict: &MergeConflict| {
            assert!(conflict.base.contains_key(b"k"));
            assert!(conflict.conflicting_keys.is_empty());
            MergeDecision::Merged(conflict.base.clone())
        })));
        let (page, _, _) = diverge(policy);
        let report = resolve_heads(&page).await.unwrap();
        assert_eq!(report.merges.len(), 1);
        assert_eq!(page.get(b"k").unwrap(), ValueLookup::Found(Bytes::from_static(b"v1")));
        assert_eq!(page.get(b"m").unwrap(), ValueLookup::Missing);
    }

    #[tokio::test]
    async fn identical_merges_on_two_replicas_match() {
        let a = page_with(MergePolicy::LastOneWins);
        let b = page_with(MergePolicy::LastOneWins);
        let c1 = write(&a, "k", "v1");
        deliver(&a, &b, &c1);
        let c2 = write(&b, "k", "v2");
        let c3 = write(&a, "m", "x");
        deliver(&b, &a, &c2);
        deliver(&a, &b, &c3);

        let on_a = resolve_heads(&a).await.unwrap();
        let on_b = resolve_heads(&b).await.unwrap();
        assert_eq!(on_a.merges[0].id(), on_b.merges[0].id());
    }
}

//! Garbage collection of unreferenced objects.
//!
//! Reference counts are never maintained incrementally. They are derived by
//! scanning everything that can point at an object:
//!
//! - finalized commits (their own object, their root, their entries)
//! - pending commits (root and entries, when the root is local)
//! - reference rows of the current head
//! - objects pinned by the caller
//!
//! Fragments of a counted object are counted too. Commits themselves are
//! never collected; the graph is append-only.

use crate::commit::Commit;
use crate::entries::EntrySet;
use crate::error::CoreResult;
use crate::keys::encode_hex;
use crate::object::{ObjectIdentifier, ObjectStore};
use crate::page::Page;
use pagedb_storage::WriteBatch;
use std::collections::BTreeMap;
use tracing::info;

/// Options for [`collect_garbage`].
#[derive(Debug, Clone, Default)]
pub struct GcOptions {
    /// Objects to keep even if nothing references them.
    pub pinned: Vec<ObjectIdentifier>,
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
}

impl GcOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `id` alive.
    #[must_use]
    pub fn pin(mut self, id: ObjectIdentifier) -> Self {
        self.pinned.push(id);
        self
    }

    /// Sets dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Value rows examined.
    pub scanned: usize,
    /// Value rows kept.
    pub retained: usize,
    /// Digests of value rows deleted (or that would be, in dry-run mode).
    pub deleted: Vec<[u8; 32]>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl GcReport {
    /// Returns the deleted digests as hex strings.
    #[must_use]
    pub fn deleted_hex(&self) -> Vec<String> {
        self.deleted.iter().map(|d| encode_hex(d)).collect()
    }
}

struct Counter<'a> {
    objects: &'a ObjectStore,
    counts: BTreeMap<[u8; 32], usize>,
}

impl Counter<'_> {
    fn add(&mut self, digest: [u8; 32]) -> CoreResult<()> {
        let count = self.counts.entry(digest).or_insert(0);
        *count += 1;
        if *count == 1 {
            for fragment in self.objects.fragments(&digest)? {
                *self.counts.entry(*fragment.digest()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    fn add_entries(&mut self, entries: &EntrySet) -> CoreResult<()> {
        for (_, entry) in entries {
            self.add(*entry.object.digest())?;
        }
        Ok(())
    }

    fn add_commit_contents(&mut self, page: &Page, commit: &Commit) -> CoreResult<()> {
        let root = commit.root_object();
        self.add(*root.digest())?;
        if page.objects().has_object(root)? {
            self.add_entries(&page.entry_set_at(commit)?)?;
        }
        Ok(())
    }
}

/// Derives how many live references point at each object digest.
///
/// # Errors
///
/// Returns an error if a commit, entry set or reference row is unreadable.
pub fn reference_counts(page: &Page) -> CoreResult<BTreeMap<[u8; 32], usize>> {
    reference_counts_with(page, &[])
}

fn reference_counts_with(
    page: &Page,
    pinned: &[ObjectIdentifier],
) -> CoreResult<BTreeMap<[u8; 32], usize>> {
    let mut counter = Counter {
        objects: page.objects(),
        counts: BTreeMap::new(),
    };

    for id in page.graph().commit_ids()? {
        let commit = page.graph().require(&id)?;
        counter.add(*id.as_bytes())?;
        counter.add_commit_contents(page, &commit)?;
    }
    for (commit, _) in page.graph().pending()? {
        counter.add_commit_contents(page, &commit)?;
    }
    counter.add_entries(&page.entries()?)?;
    for id in pinned {
        counter.add(*id.digest())?;
    }

    Ok(counter.counts)
}

/// Deletes value rows nothing references.
///
/// Runs under the page's write lock, so journal commits and sync
/// application cannot interleave with the scan. Objects written outside a
/// journal and not yet referenced must be passed in [`GcOptions::pinned`].
///
/// # Errors
///
/// Returns an error if the scan fails or the deletion cannot be written.
pub fn collect_garbage(page: &Page, options: &GcOptions) -> CoreResult<GcReport> {
    let _guard = page.lock_writes();
    let counts = reference_counts_with(page, &options.pinned)?;

    let mut report = GcReport {
        dry_run: options.dry_run,
        ..GcReport::default()
    };
    let mut batch = WriteBatch::new();
    for digest in page.objects().object_digests()? {
        report.scanned += 1;
        if counts.contains_key(&digest) {
            report.retained += 1;
        } else {
            page.objects().stage_delete_object(&mut batch, &digest);
            report.deleted.push(digest);
        }
    }

    if !options.dry_run && !batch.is_empty() {
        page.store().write(batch)?;
    }
    info!(
        page = %page.id(),
        scanned = report.scanned,
        deleted = report.deleted.len(),
        dry_run = options.dry_run,
        "garbage collection finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FRAGMENT_SIZE;
    use crate::page::PageOptions;
    use crate::types::PageId;
    use pagedb_storage::InMemoryStore;
    use std::sync::Arc;

    fn page() -> Page {
        Page::open(Arc::new(InMemoryStore::new()), PageId::new(), PageOptions::new()).unwrap()
    }

    #[test]
    fn fresh_page_has_nothing_to_collect() {
        let page = page();
        let report = collect_garbage(&page, &GcOptions::new()).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.scanned, report.retained);
    }

    #[test]
    fn orphan_object_is_collected() {
        let page = page();
        let orphan = page.objects().put(b"nobody points here").unwrap();

        let dry = collect_garbage(&page, &GcOptions::new().dry_run(true)).unwrap();
        assert_eq!(dry.deleted, vec![*orphan.digest()]);
        assert!(page.objects().has_object(&orphan).unwrap());

        let report = collect_garbage(&page, &GcOptions::new()).unwrap();
        assert_eq!(report.deleted_hex(), vec![orphan.to_hex()]);
        assert!(!page.objects().has_object(&orphan).unwrap());
    }

    #[test]
    fn pinned_object_survives() {
        let page = page();
        let pinned = page.objects().put(b"keep me").unwrap();
        let report = collect_garbage(&page, &GcOptions::new().pin(pinned)).unwrap();
        assert!(report.deleted.is_empty());
    }

    #[test]
    fn history_keeps_overwritten_values() {
        let page = page();
        let mut journal = page.begin();
        let old = journal.put("k", b"old").unwrap();
        journal.commit().unwrap();
        let mut journal = page.begin();
        journal.put("k", b"new").unwrap();
        journal.commit().unwrap();

        let counts = reference_counts(&page).unwrap();
        assert_eq!(counts.get(old.digest()), Some(&1));

        collect_garbage(&page, &GcOptions::new()).unwrap();
        assert!(page.objects().has_object(&old).unwrap());
    }

    #[test]
    fn fragments_of_live_objects_survive() {
        let page = page();
        let big = vec![9u8; FRAGMENT_SIZE + 1];
        let mut journal = page.begin();
        let id = journal.put("big", &big).unwrap();
        journal.commit().unwrap();

        let report = collect_garbage(&page, &GcOptions::new()).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(page.objects().get(&id).unwrap().unwrap().len(), big.len());
    }

    #[test]
    fn shared_values_are_counted_per_reference() {
        let page = page();
        let mut journal = page.begin();
        let id = journal.put("a", b"same").unwrap();
        journal.put("b", b"same").unwrap();
        journal.commit().unwrap();

        // one commit root entry set (two entries) plus two reference rows
        assert_eq!(reference_counts(&page).unwrap().get(id.digest()), Some(&4));
    }
}

//! Compact command implementation.

use super::open_store;
use std::path::Path;
use tracing::info;

/// Compaction result.
#[derive(Debug)]
pub struct CompactResult {
    /// File size before compaction.
    pub size_before: u64,
    /// File size after compaction.
    pub size_after: u64,
    /// Whether the engine rewrote the file.
    pub compacted: bool,
}

impl CompactResult {
    /// Returns the number of bytes reclaimed.
    pub fn reclaimed(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting store at {}", path.display());
    let result = compact(path)?;
    if !result.compacted {
        println!("  Nothing to compact");
    }
    println!("  Before:    {} bytes", result.size_before);
    println!("  After:     {} bytes", result.size_after);
    println!("  Reclaimed: {} bytes", result.reclaimed());
    Ok(())
}

/// Compacts the database file, releasing pages freed by deletes.
pub fn compact(path: &Path) -> Result<CompactResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let size_before = store.file_size()?;
    let compacted = store.compact()?;
    let size_after = store.file_size()?;
    info!(path = %path.display(), size_before, size_after, compacted, "compacted store");
    Ok(CompactResult {
        size_before,
        size_after,
        compacted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_core::{collect_garbage, GcOptions, Page, PageId, PageOptions};
    use pagedb_storage::{FileStore, StoreOptions};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn compaction_keeps_the_page_readable() {
        let dir = tempdir().unwrap();
        let id = PageId::new();
        {
            let store = Arc::new(FileStore::open(dir.path(), StoreOptions::default()).unwrap());
            let page = Page::open(store, id, PageOptions::new()).unwrap();
            for i in 0..20u8 {
                let mut journal = page.begin();
                journal.put("k", &[i; 512]).unwrap();
                journal.commit().unwrap();
            }
            let report = collect_garbage(&page, &GcOptions::new()).unwrap();
            assert!(report.deleted.is_empty());
            let mut journal = page.begin();
            journal.put("kept", b"value").unwrap();
            journal.delete("k");
            journal.commit().unwrap();
        }

        let result = compact(dir.path()).unwrap();
        assert!(result.size_after <= result.size_before);
        assert_eq!(result.reclaimed(), result.size_before - result.size_after);

        let store = Arc::new(FileStore::open(dir.path(), StoreOptions::default()).unwrap());
        let page = Page::open(store, id, PageOptions::new()).unwrap();
        let value = page.get(b"kept").unwrap().found().unwrap();
        assert_eq!(value.as_ref(), b"value");
    }
}

//! Inspect command implementation.

use super::{open_pages, open_store};
use pagedb_core::{keys, Page};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Size of the database file in bytes.
    pub file_size: u64,
    /// Per-page details.
    pub pages: Vec<PageStats>,
}

/// Statistics for a single page.
#[derive(Debug, Serialize)]
pub struct PageStats {
    /// Page id (hex).
    pub id: String,
    /// Head commit ids, oldest first.
    pub heads: Vec<String>,
    /// Head reads are served from.
    pub current_head: String,
    /// Number of finalized commits.
    pub commits: usize,
    /// Commits waiting for missing ancestors.
    pub pending: usize,
    /// Local commits the remote log has not acknowledged.
    pub unsynced: usize,
    /// Number of entries at the current head.
    pub entries: usize,
    /// Number of stored value rows.
    pub objects: usize,
    /// Persisted remote log cursor (hex), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_cursor: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, page: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, page)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

/// Collects statistics for the selected pages.
pub fn inspect(path: &Path, page: Option<&str>) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let mut pages = Vec::new();
    for page in open_pages(&store, page)? {
        pages.push(page_stats(&page)?);
    }
    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: store.file_size()?,
        pages,
    })
}

fn page_stats(page: &Page) -> Result<PageStats, Box<dyn std::error::Error>> {
    let graph = page.graph();
    Ok(PageStats {
        id: page.id().to_hex(),
        heads: graph.heads()?.iter().map(|id| id.to_hex()).collect(),
        current_head: page.current_head()?.id().to_hex(),
        commits: graph.commit_ids()?.len(),
        pending: graph.pending()?.len(),
        unsynced: page.unsynced_commits()?.len(),
        entries: page.entries()?.len(),
        objects: page.objects().object_digests()?.len(),
        sync_cursor: page.sync_cursor()?.map(|c| keys::encode_hex(&c)),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("PageDB Store Inspection");
    println!("=======================");
    println!();
    println!("Path:      {}", result.path);
    println!("File size: {} bytes", result.file_size);
    println!("Pages:     {}", result.pages.len());

    for page in &result.pages {
        println!();
        println!("Page {}", page.id);
        println!("  Current head: {}", page.current_head);
        if page.heads.len() > 1 {
            println!("  Heads ({}, awaiting merge):", page.heads.len());
            for head in &page.heads {
                println!("    {head}");
            }
        }
        println!("  Commits:      {}", page.commits);
        println!("  Pending:      {}", page.pending);
        println!("  Unsynced:     {}", page.unsynced);
        println!("  Entries:      {}", page.entries);
        println!("  Objects:      {}", page.objects);
        match &page.sync_cursor {
            Some(cursor) => println!("  Cursor:       {cursor}"),
            None => println!("  Cursor:       (never synced)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_core::{PageId, PageOptions};
    use pagedb_storage::{FileStore, StoreOptions};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn reports_each_page() {
        let dir = tempdir().unwrap();
        let id = PageId::new();
        {
            let store = Arc::new(FileStore::open(dir.path(), StoreOptions::default()).unwrap());
            let page = Page::open(store, id, PageOptions::new()).unwrap();
            let mut journal = page.begin();
            journal.put("a", b"1").unwrap();
            journal.put("b", b"2").unwrap();
            journal.commit().unwrap();
        }

        let result = inspect(dir.path(), None).unwrap();
        assert_eq!(result.pages.len(), 1);
        let stats = &result.pages[0];
        assert_eq!(stats.id, id.to_hex());
        assert_eq!(stats.heads, vec![stats.current_head.clone()]);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.unsynced, 1);
        assert_eq!(stats.pending, 0);
        assert!(stats.sync_cursor.is_none());
        assert!(result.file_size > 0);
    }

    #[test]
    fn unknown_page_is_an_error() {
        let dir = tempdir().unwrap();
        drop(FileStore::open(dir.path(), StoreOptions::default()).unwrap());
        assert!(inspect(dir.path(), Some(&PageId::new().to_hex())).is_err());
        assert!(inspect(dir.path(), Some("not-hex")).is_err());
    }
}

//! CLI command implementations.

pub mod compact;
pub mod gc;
pub mod inspect;
pub mod verify;

use pagedb_core::{Page, PageId, PageOptions};
use pagedb_storage::{FileStore, KvStore, StoreOptions};
use std::path::Path;
use std::sync::Arc;

/// Opens an existing store without creating anything.
pub(crate) fn open_store(path: &Path) -> Result<Arc<FileStore>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let options = StoreOptions::new().create_if_missing(false);
    Ok(Arc::new(FileStore::open(path, options)?))
}

/// Opens the selected page, or every page in the store.
pub(crate) fn open_pages(
    store: &Arc<FileStore>,
    page: Option<&str>,
) -> Result<Vec<Page>, Box<dyn std::error::Error>> {
    let kv: Arc<dyn KvStore> = store.clone();
    let ids = match page {
        Some(hex) => {
            let id = PageId::from_hex(hex).ok_or_else(|| format!("Invalid page id {hex:?}"))?;
            if !Page::exists(kv.as_ref(), &id)? {
                return Err(format!("Page {id} not found").into());
            }
            vec![id]
        }
        None => Page::list_pages(kv.as_ref())?,
    };

    let mut pages = Vec::with_capacity(ids.len());
    for id in ids {
        pages.push(Page::open(kv.clone(), id, PageOptions::new())?);
    }
    Ok(pages)
}

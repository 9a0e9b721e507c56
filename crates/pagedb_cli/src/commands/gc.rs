//! Garbage collection command implementation.

use super::{open_pages, open_store};
use pagedb_core::{collect_garbage, GcOptions, GcReport};
use std::path::Path;

/// Runs the gc command.
pub fn run(path: &Path, page: Option<&str>, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let options = GcOptions::new().dry_run(dry_run);

    let mut total = 0;
    for page in open_pages(&store, page)? {
        let report = collect_garbage(&page, &options)?;
        print_report(&page.id().to_hex(), &report);
        total += report.deleted.len();
    }

    println!();
    if dry_run {
        println!("Dry run: {total} value row(s) would be deleted");
    } else {
        println!("Deleted {total} value row(s)");
        if total > 0 {
            println!("Run `pagedb compact` to reclaim the space on disk");
        }
    }
    Ok(())
}

fn print_report(page: &str, report: &GcReport) {
    println!("Page {page}");
    println!("  Scanned:  {}", report.scanned);
    println!("  Retained: {}", report.retained);
    println!("  Deleted:  {}", report.deleted.len());
    for digest in report.deleted_hex() {
        println!("    {digest}");
    }
}

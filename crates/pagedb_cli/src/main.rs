//! PageDB CLI
//!
//! Command-line tools for PageDB store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display pages, heads and sync bookkeeping
//! - `verify` - Re-hash every object and check the commit graph
//! - `gc` - Delete values no commit or entry can reach
//! - `compact` - Compact the database file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PageDB command-line store tools.
#[derive(Parser)]
#[command(name = "pagedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display pages, heads and sync bookkeeping
    Inspect {
        /// Only this page (hex id)
        #[arg(long)]
        page: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify object hashes and commit graph integrity
    Verify {
        /// Only this page (hex id)
        #[arg(long)]
        page: Option<String>,
    },

    /// Delete unreachable values
    Gc {
        /// Only this page (hex id)
        #[arg(long)]
        page: Option<String>,

        /// Dry run - show what would be deleted
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Compact the database file to reclaim space
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { page, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, page.as_deref(), &format)?;
        }
        Commands::Verify { page } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, page.as_deref())?;
        }
        Commands::Gc { page, dry_run } => {
            let path = cli.path.ok_or("Store path required for gc")?;
            commands::gc::run(&path, page.as_deref(), dry_run)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("PageDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

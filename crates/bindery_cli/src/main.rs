//! Bindery CLI
//!
//! Command-line tools for inspecting and repairing a Bindery library.
//!
//! # Commands
//!
//! - `inspect` - Key counts per namespace and log statistics
//! - `verify` - Check secondary indexes against primary records
//! - `rebuild-indexes` - Recompute every secondary index
//! - `list-contributors` - Page through contributors
//! - `changes` - Contributors and books changed since a timestamp
//! - `merge` / `unmerge` - Consolidate or split contributors
//! - `checkpoint` - Snapshot the store and truncate the log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bindery command-line library tools.
#[derive(Parser)]
#[command(name = "bindery")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the library directory
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
    /// Display key counts and log statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify secondary indexes against primary records
    Verify {
        /// Print every problem instead of a summary
        #[arg(short, long)]
        detailed: bool,
    },

    /// Recompute every secondary index from primary records
    RebuildIndexes,

    /// List contributors one page at a time
    ListContributors {
        /// Page size
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Cursor printed by a previous page
        #[arg(short, long)]
        cursor: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show records changed after a timestamp
    Changes {
        /// RFC 3339 timestamp; changes strictly after it are shown
        #[arg(short, long)]
        since: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Merge the source contributor into the target
    Merge {
        /// Contributor to fold away
        source: String,
        /// Contributor that survives
        target: String,
    },

    /// Split an alias off a contributor into a new contributor
    Unmerge {
        /// Contributor carrying the alias
        source: String,
        /// Alias to split off
        alias: String,
    },

    /// Write a snapshot and truncate the log
    Checkpoint,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Library path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify { detailed } => {
            let path = cli.path.ok_or("Library path required for verify")?;
            commands::verify::run(&path, detailed)?;
        }
        Commands::RebuildIndexes => {
            let path = cli.path.ok_or("Library path required for rebuild-indexes")?;
            commands::verify::rebuild(&path)?;
        }
        Commands::ListContributors {
            limit,
            cursor,
            format,
        } => {
            let path = cli.path.ok_or("Library path required for list-contributors")?;
            commands::contributors::run(&path, limit, cursor.as_deref(), &format)?;
        }
        Commands::Changes { since, format } => {
            let path = cli.path.ok_or("Library path required for changes")?;
            commands::changes::run(&path, &since, &format)?;
        }
        Commands::Merge { source, target } => {
            let path = cli.path.ok_or("Library path required for merge")?;
            commands::merge::merge(&path, &source, &target)?;
        }
        Commands::Unmerge { source, alias } => {
            let path = cli.path.ok_or("Library path required for unmerge")?;
            commands::merge::unmerge(&path, &source, &alias)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Library path required for checkpoint")?;
            commands::checkpoint::run(&path)?;
        }
        Commands::Version => {
            println!("Bindery CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Bindery Core v{}", bindery_core::VERSION);
        }
    }

    Ok(())
}

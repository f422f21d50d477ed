//! apmstore CLI
//!
//! Offline tools for an apmstore storage root.
//!
//! # Commands
//!
//! - `list` - List the storages under the root
//! - `inspect` - Show one storage's metadata, index generations and channels
//! - `verify` - Check that every indexed record lies inside its channel file
//! - `version` - Show version information
//!
//! The root is opened without taking its lock, so the tools can run next to
//! a live server. Storages that are still being written may show incomplete
//! index data.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// apmstore command-line storage tools.
#[derive(Parser)]
#[command(name = "apmstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage root directory
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
    /// List the storages under the root
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show metadata, index generations and channels of one storage
    Inspect {
        /// Storage id
        id: String,

        /// List every index entry
        #[arg(short, long)]
        entries: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify that indexed records lie inside their channel files
    Verify {
        /// Storage id (all storages if omitted)
        id: Option<String>,

        /// Also decode every record and check its id
        #[arg(short, long)]
        decode: bool,
    },

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
        Commands::List { format } => {
            let path = cli.path.ok_or("Storage root path required for list")?;
            commands::list::run(&path, &format)?;
        }
        Commands::Inspect {
            id,
            entries,
            format,
        } => {
            let path = cli.path.ok_or("Storage root path required for inspect")?;
            commands::inspect::run(&path, &id, entries, &format)?;
        }
        Commands::Verify { id, decode } => {
            let path = cli.path.ok_or("Storage root path required for verify")?;
            commands::verify::run(&path, id.as_deref(), decode)?;
        }
        Commands::Version => {
            println!("apmstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("apmstore Core v{}", apmstore_core::VERSION);
        }
    }

    Ok(())
}

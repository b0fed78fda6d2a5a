//! CLI argument parsing for waystore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ws")]
#[command(author, version, about = "Inspect a waystore state directory", long_about = None)]
pub struct Cli {
    /// State directory to inspect
    #[arg(short, long, default_value = ".waypoint/state")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List record keys under a prefix
    List {
        /// Key prefix (e.g. "sessions/")
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print a record's payload
    Get {
        /// Record key
        #[arg(required = true)]
        key: String,
    },

    /// Validate every record under a prefix
    Verify {
        /// Key prefix (default: whole store)
        #[arg(default_value = "")]
        prefix: String,
    },
}

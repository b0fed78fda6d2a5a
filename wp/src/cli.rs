//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Waypoint - session state persistence and crash recovery
#[derive(Parser)]
#[command(
    name = "wp",
    about = "Session state persistence and crash recovery",
    version,
    after_help = "Logs are written to: ~/.local/share/waypoint/logs/waypoint.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Override the state directory from the config
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Classify interrupted sessions as resumed, cleaned or failed
    Recover {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Recover, then archive stale sessions periodically until stopped
    Serve,

    /// List sessions
    Sessions {
        /// Include completed and archived sessions
        #[arg(short, long)]
        all: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one session record
    Show {
        /// Session ID
        session_id: String,
    },

    /// List a task's retained checkpoints
    Checkpoints {
        /// Task ID
        task_id: String,
    },

    /// Archive active sessions that are stale and have no live container
    Cleanup {
        /// Idle time before a session counts as stale (defaults to sessions.session-timeout-secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

/// Output format for report and listing commands
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

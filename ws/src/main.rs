use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};

use waystore::cli::{Cli, Command};
use waystore::{FileStore, RecordStore, StoreError};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let store = FileStore::open_read_only(&cli.root)
        .context(format!("Failed to open store at {}", cli.root.display()))?;

    info!("ws inspecting {}", cli.root.display());

    match cli.command {
        Command::List { prefix } => {
            let mut count = 0;
            for key in store.list(&prefix)?.iter() {
                println!("{}", key?);
                count += 1;
            }
            if count == 0 {
                println!("No records under {:?}", prefix);
            }
        }
        Command::Get { key } => {
            let bytes = store.get(&key)?;
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", String::from_utf8_lossy(&bytes)),
            }
        }
        Command::Verify { prefix } => {
            let mut ok = 0usize;
            let mut bad = 0usize;
            for key in store.list(&prefix)?.iter() {
                let key = key?;
                match store.get(&key) {
                    Ok(_) => ok += 1,
                    Err(StoreError::Corrupted { reason, .. }) => {
                        warn!("corrupted record {}: {}", key, reason);
                        println!("{} {} {}", "✗".red(), key.yellow(), reason.dimmed());
                        bad += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            println!("{} {} valid, {} corrupted", "✓".green(), ok, bad);
            if bad > 0 {
                return Err(eyre::eyre!("{} corrupted record(s) found", bad));
            }
        }
    }

    Ok(())
}

//! Waypoint - session state persistence and crash recovery
//!
//! CLI entry point for recovery, serving and inspection.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use waypoint::cli::{Cli, Command, OutputFormat};
use waypoint::config::Config;
use waypoint::{CheckpointRole, RecoveryReport, Session, SessionStatus, Waypoint};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waypoint")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("waypoint.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.state_dir {
        config.storage.state_dir = dir.to_string_lossy().into_owned();
    }
    config.validate().context("Invalid configuration")?;

    info!(state_dir = %config.storage.state_dir, "Waypoint loaded config");

    match cli.command {
        Command::Recover { format } => cmd_recover(&config, format).await,
        Command::Serve => cmd_serve(&config).await,
        Command::Sessions { all, format } => cmd_sessions(&config, all, format).await,
        Command::Show { session_id } => cmd_show(&config, &session_id).await,
        Command::Checkpoints { task_id } => cmd_checkpoints(&config, &task_id).await,
        Command::Cleanup { ttl_secs } => cmd_cleanup(&config, ttl_secs).await,
    }
}

async fn cmd_recover(config: &Config, format: OutputFormat) -> Result<()> {
    let waypoint = Waypoint::open(config).context("Failed to open state directory")?;
    let report = waypoint
        .engine
        .run_recovery()
        .await
        .context("Crash recovery failed; refusing to continue")?;
    print_report(&report, &format)
}

async fn cmd_serve(config: &Config) -> Result<()> {
    let waypoint = Waypoint::open(config).context("Failed to open state directory")?;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let signal_handle = tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal(shutdown_tx).await {
            tracing::error!(error = %e, "Failed to install signal handlers");
        }
    });

    if config.recovery.auto_recovery {
        let report = waypoint
            .engine
            .run_recovery_until(&mut shutdown_rx)
            .await
            .context("Crash recovery failed; refusing to start")?;
        print_report(&report, &OutputFormat::Text)?;
        if report.interrupted {
            info!("Shutdown during recovery; exiting");
            return Ok(());
        }
    } else {
        info!("Auto-recovery disabled");
    }

    info!(
        interval_secs = config.sessions.cleanup_interval_secs,
        ttl_secs = config.sessions.session_timeout_secs,
        "Serving. Press Ctrl+C to stop."
    );
    println!("{} serving; press Ctrl+C to stop", "waypoint".cyan());

    waypoint
        .tracker
        .run_cleanup_loop(
            config.sessions.cleanup_interval(),
            config.sessions.session_timeout(),
            shutdown_rx,
        )
        .await
        .context("Stale-session cleanup failed")?;

    signal_handle.abort();
    info!("Waypoint shutting down...");
    Ok(())
}

async fn wait_for_shutdown_signal(shutdown_tx: mpsc::Sender<()>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    let _ = shutdown_tx.send(()).await;
    Ok(())
}

async fn cmd_sessions(config: &Config, all: bool, format: OutputFormat) -> Result<()> {
    if !config.storage.state_path().is_dir() {
        println!("No sessions");
        return Ok(());
    }
    let waypoint = Waypoint::open_read_only(config).context("Failed to open state directory")?;
    let sessions: Vec<Session> = waypoint
        .state
        .list_sessions()
        .await?
        .into_iter()
        .filter(|s| all || s.is_active())
        .collect();

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    println!(
        "{:<40} {:<24} {:<10} {:<16} {}",
        "SESSION".bold(),
        "TASK".bold(),
        "STATUS".bold(),
        "STEP".bold(),
        "UPDATED".bold()
    );
    for session in &sessions {
        let status = format!("{:<10}", session.status);
        let status = match session.status {
            SessionStatus::Active => status.green(),
            SessionStatus::Completed => status.blue(),
            SessionStatus::Archived => status.dimmed(),
        };
        println!(
            "{:<40} {:<24} {} {:<16} {}",
            session.session_id,
            session.task_id,
            status,
            session.current_step,
            format_ms(session.last_updated)
        );
    }
    Ok(())
}

async fn cmd_show(config: &Config, session_id: &str) -> Result<()> {
    let waypoint = Waypoint::open_read_only(config).context("Failed to open state directory")?;
    let session = waypoint
        .state
        .load_session_state(session_id)
        .await
        .context(format!("Failed to load session {}", session_id))?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

async fn cmd_checkpoints(config: &Config, task_id: &str) -> Result<()> {
    let waypoint = Waypoint::open_read_only(config).context("Failed to open state directory")?;
    let Some(index) = waypoint.checkpoints.task_index(task_id).await? else {
        println!("No checkpoints for task {}", task_id);
        return Ok(());
    };

    println!(
        "{} (next seq {}, {} retained)",
        task_id.cyan(),
        index.next_seq,
        index.entries.len()
    );
    for checkpoint in waypoint.checkpoints.list_checkpoints(task_id).await? {
        let role = index.role_of(checkpoint.seq()).unwrap_or(CheckpointRole::Plain);
        let marker = if role == CheckpointRole::ResumeTarget {
            "*".green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:>6}  {:<14} {:<20} {}",
            marker,
            checkpoint.seq(),
            role.to_string(),
            checkpoint.step_name,
            format_ms(checkpoint.timestamp).dimmed()
        );
    }
    Ok(())
}

async fn cmd_cleanup(config: &Config, ttl_secs: Option<u64>) -> Result<()> {
    let waypoint = Waypoint::open(config).context("Failed to open state directory")?;
    let ttl = ttl_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.sessions.session_timeout());

    let archived = waypoint.tracker.cleanup_stale_sessions(ttl).await?;
    if archived.is_empty() {
        println!("No stale sessions");
    } else {
        for session_id in &archived {
            println!("{} archived {}", "✓".green(), session_id.cyan());
        }
        println!("Archived {} stale session(s)", archived.len());
    }
    Ok(())
}

fn print_report(report: &RecoveryReport, format: &OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("{} no interrupted sessions", "✓".green());
        return Ok(());
    }
    let reason = |id: &String| report.reasons.get(id).cloned().unwrap_or_default();
    for id in &report.resumed {
        println!("{} {} resumed", "✓".green(), id.cyan());
    }
    for id in &report.cleaned {
        println!("{} {} cleaned: {}", "•".yellow(), id.cyan(), reason(id).dimmed());
    }
    for id in &report.failed {
        println!("{} {} failed: {}", "✗".red(), id.cyan(), reason(id).dimmed());
    }
    println!("{}", report);
    if report.interrupted {
        println!("{}", "recovery interrupted by shutdown".yellow());
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

//! Waypoint configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::recovery::RecoveryOptions;

/// Main Waypoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Durable store location
    pub storage: StorageConfig,

    /// Checkpoint retention
    pub checkpoints: CheckpointConfig,

    /// Crash recovery behavior
    pub recovery: RecoveryConfig,

    /// Session lifetime and cleanup
    pub sessions: SessionsConfig,
}

impl Config {
    /// Reject settings the managers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.storage.state_dir.trim().is_empty() {
            return Err(eyre::eyre!("storage.state-dir must not be empty"));
        }
        if self.checkpoints.max_checkpoints == 0 {
            return Err(eyre::eyre!("checkpoints.max-checkpoints must be at least 1"));
        }
        if self.recovery.max_workers == 0 {
            return Err(eyre::eyre!("recovery.max-workers must be at least 1"));
        }
        if self.recovery.reconnect_timeout_ms == 0 {
            return Err(eyre::eyre!("recovery.reconnect-timeout-ms must be greater than 0"));
        }
        if self.recovery.max_context_fragments == 0 {
            return Err(eyre::eyre!("recovery.max-context-fragments must be at least 1"));
        }
        if self.sessions.cleanup_interval_secs == 0 {
            return Err(eyre::eyre!("sessions.cleanup-interval-secs must be greater than 0"));
        }
        Ok(())
    }

    /// Load from `--config`, `.waypoint.yml`, the user config dir, or defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Cannot load config {}", path.display()));
        }

        // Try project-local config: .waypoint.yml
        let local_config = PathBuf::from(".waypoint.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!(path = %local_config.display(), error = %e, "Ignoring unreadable config");
                }
            }
        }

        // Try user config: ~/.config/waypoint/waypoint.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("waypoint").join("waypoint.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(path = %user_config.display(), error = %e, "Ignoring unreadable config");
                    }
                }
            }
        }

        tracing::info!("No waypoint config found; using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Cannot read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Invalid YAML in config file")?;

        tracing::info!(path = %path.as_ref().display(), "Loaded config");
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the durable store
    #[serde(rename = "state-dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/waypoint/state on Linux)
        let state_dir = dirs::data_dir()
            .map(|d| d.join("waypoint").join("state"))
            .unwrap_or_else(|| PathBuf::from(".waypoint/state"))
            .to_string_lossy()
            .into_owned();

        Self { state_dir }
    }
}

impl StorageConfig {
    /// State directory with a leading `~/` expanded
    pub fn state_path(&self) -> PathBuf {
        match self.state_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.state_dir)),
            None => PathBuf::from(&self.state_dir),
        }
    }
}

/// Checkpoint retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Non-target checkpoints kept per task
    #[serde(rename = "max-checkpoints")]
    pub max_checkpoints: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { max_checkpoints: 10 }
    }
}

/// Crash recovery behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Run recovery automatically when serving
    #[serde(rename = "auto-recovery")]
    pub auto_recovery: bool,

    /// Sessions recovered concurrently
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Bound on each container or LLM call in milliseconds
    #[serde(rename = "reconnect-timeout-ms")]
    pub reconnect_timeout_ms: u64,

    /// Newest context fragments kept when rehydrating
    #[serde(rename = "max-context-fragments")]
    pub max_context_fragments: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            max_workers: 8,
            reconnect_timeout_ms: 30_000,
            max_context_fragments: 200,
        }
    }
}

impl RecoveryConfig {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn options(&self) -> RecoveryOptions {
        RecoveryOptions {
            max_workers: self.max_workers,
            reconnect_timeout: self.reconnect_timeout(),
        }
    }
}

/// Session lifetime and cleanup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Idle time after which a session with a dead container is archived
    #[serde(rename = "session-timeout-secs")]
    pub session_timeout_secs: u64,

    /// Interval between stale-session sweeps when serving
    #[serde(rename = "cleanup-interval-secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 3600,
            cleanup_interval_secs: 3600,
        }
    }
}

impl SessionsConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

//! Settings for the bridge process.
//!
//! Settings are loaded from a TOML file; every field has a default so an
//! empty file (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading the settings file
    #[error("failed to read settings file: {0}")]
    Io(#[from] io::Error),

    /// Error parsing TOML
    #[error("failed to parse TOML settings: {0}")]
    Toml(#[from] toml::de::Error),

    /// Settings file not found
    #[error("settings file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Bridge settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Private directory holding the session config and management socket
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// How many times to retry binding the management socket (default: 10)
    #[serde(default = "default_bind_retry_limit")]
    pub bind_retry_limit: u32,

    /// Fixed delay between bind attempts in milliseconds (default: 300)
    #[serde(default = "default_bind_retry_delay_ms")]
    pub bind_retry_delay_ms: u64,

    /// Statistics sampling interval in milliseconds (default: 1000)
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// How long to wait for the read loop to exit on shutdown before
    /// aborting it, in milliseconds (default: 2000)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// External engine binary started for each session (default: "openvpn")
    #[serde(default = "default_engine_command")]
    pub engine_command: String,

    /// Log level: trace, debug, info, warn or error (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir().join("ovpn-bridge")
}

fn default_bind_retry_limit() -> u32 {
    10
}

fn default_bind_retry_delay_ms() -> u64 {
    300
}

fn default_stats_interval_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_engine_command() -> String {
    "openvpn".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            runtime_dir: default_runtime_dir(),
            bind_retry_limit: default_bind_retry_limit(),
            bind_retry_delay_ms: default_bind_retry_delay_ms(),
            stats_interval_ms: default_stats_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            engine_command: default_engine_command(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeSettings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Location of the persisted per-session engine configuration.
    pub fn config_path(&self) -> PathBuf {
        self.runtime_dir.join("session.ovpn")
    }

    /// Location of the management listening socket.
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join("mgmt.sock")
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bind_retry_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

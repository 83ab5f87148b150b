//! Configuration resolution for muxd.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/muxd/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol;

/// Complete muxd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    /// Bounded wait for the readiness poll, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Sleep after a poll that reported nothing ready. Zero disables it.
    pub idle_sleep_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            log_level: "info".to_string(),
            log_json: false,
            poll_timeout_ms: 5,
            idle_sleep_ms: 1,
        }
    }
}

impl DaemonConfig {
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub const fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// The configured socket path, or a configuration error when unset.
    pub fn require_socket_path(&self) -> Result<&Path> {
        self.socket_path
            .as_deref()
            .ok_or_else(|| Error::Config("no socket path configured".to_string()))
    }
}

/// Session protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub greeting: String,
    pub acknowledgment: String,
    pub prompt: String,
    pub terminator: String,
    pub max_command_bytes: usize,
    /// Upper bound for the synchronous acknowledgment read.
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            greeting: String::from_utf8_lossy(protocol::DEFAULT_GREETING).into_owned(),
            acknowledgment: String::from_utf8_lossy(protocol::DEFAULT_ACKNOWLEDGMENT)
                .into_owned(),
            prompt: String::from_utf8_lossy(protocol::DEFAULT_PROMPT).into_owned(),
            terminator: String::from_utf8_lossy(protocol::DEFAULT_TERMINATOR).into_owned(),
            max_command_bytes: protocol::DEFAULT_MAX_COMMAND_BYTES,
            handshake_timeout_ms: None,
        }
    }
}

impl ProtocolConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    if let Some(path) = explicit {
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("muxd").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `MUXD_*` overrides. Unparseable numeric values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("MUXD_SOCKET") {
        config.daemon.socket_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("MUXD_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(n) = lookup("MUXD_POLL_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.daemon.poll_timeout_ms = n;
    }
    if let Some(n) = lookup("MUXD_IDLE_SLEEP_MS").and_then(|v| v.parse().ok()) {
        config.daemon.idle_sleep_ms = n;
    }
    if let Some(n) = lookup("MUXD_MAX_COMMAND_BYTES").and_then(|v| v.parse().ok()) {
        config.protocol.max_command_bytes = n;
    }
}

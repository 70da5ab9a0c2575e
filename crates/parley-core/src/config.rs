//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{DEFAULT_LISTEN_PORT, DEFAULT_TRACKER_PORT, DEFAULT_USERNAME, MAX_REQUEST_BYTES};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub tracker: TrackerConfig,
    pub peer: PeerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Connections handled concurrently. Further clients wait in the backlog.
    pub max_connections: usize,
    pub backlog: u32,
    /// Bound on reading one request from a connected client.
    pub request_timeout_secs: u64,
    pub max_request_bytes: usize,
    /// Registry snapshot log interval. 0 = disabled.
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Display name announced to the tracker and in handshakes.
    pub username: String,
    /// Fixed peer id. Empty = random 8 hex chars per run.
    pub peer_id: String,
    pub tracker_host: String,
    pub tracker_port: u16,
    pub listen_addr: String,
    /// 0 = OS-assigned.
    pub listen_port: u16,
    /// Address registered with the tracker. Empty = auto-detect.
    pub advertise_ip: String,
    pub tracker_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Run the HTTP bridge alongside the tracker.
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
    /// Bound on each forwarded round trip to the co-hosted tracker.
    pub tracker_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_TRACKER_PORT,
            max_connections: 256,
            backlog: 128,
            request_timeout_secs: 5,
            max_request_bytes: MAX_REQUEST_BYTES,
            snapshot_interval_secs: 30,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            peer_id: String::new(),
            tracker_host: "127.0.0.1".to_string(),
            tracker_port: DEFAULT_TRACKER_PORT,
            listen_addr: "0.0.0.0".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            advertise_ip: String::new(),
            tracker_timeout_secs: 5,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: "127.0.0.1".to_string(),
            port: 8000,
            tracker_timeout_secs: 5,
        }
    }
}

impl TrackerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ApiConfig {
    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }
}

impl PeerConfig {
    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("parley")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParleyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARLEY_* overrides. `lookup` is the environment in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
            v.and_then(|v| v.parse().ok())
        }
        fn flag(v: Option<String>) -> Option<bool> {
            v.map(|v| v == "true" || v == "1")
        }

        if let Some(v) = lookup("PARLEY_TRACKER__BIND_ADDR") {
            self.tracker.bind_addr = v;
        }
        if let Some(p) = parsed(lookup("PARLEY_TRACKER__PORT")) {
            self.tracker.port = p;
        }
        if let Some(n) = parsed(lookup("PARLEY_TRACKER__MAX_CONNECTIONS")) {
            self.tracker.max_connections = n;
        }
        if let Some(v) = lookup("PARLEY_PEER__USERNAME") {
            self.peer.username = v;
        }
        if let Some(v) = lookup("PARLEY_PEER__PEER_ID") {
            self.peer.peer_id = v;
        }
        if let Some(v) = lookup("PARLEY_PEER__TRACKER_HOST") {
            self.peer.tracker_host = v;
        }
        if let Some(p) = parsed(lookup("PARLEY_PEER__TRACKER_PORT")) {
            self.peer.tracker_port = p;
        }
        if let Some(p) = parsed(lookup("PARLEY_PEER__LISTEN_PORT")) {
            self.peer.listen_port = p;
        }
        if let Some(v) = lookup("PARLEY_PEER__ADVERTISE_IP") {
            self.peer.advertise_ip = v;
        }
        if let Some(b) = flag(lookup("PARLEY_API__ENABLED")) {
            self.api.enabled = b;
        }
        if let Some(p) = parsed(lookup("PARLEY_API__PORT")) {
            self.api.port = p;
        }
    }
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Transport configuration.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables:
//! - `TABWIRE_TRANSPORT`: transport mode (`localStorage`, `websocket`, `hybrid`)
//! - `TABWIRE_WS_URL`: WebSocket server URL
//! - `TABWIRE_RECONNECT_INTERVAL`: base reconnect interval in milliseconds
//! - `TABWIRE_MAX_RECONNECT_ATTEMPTS`: reconnect attempts before giving up

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_TRANSPORT: &str = "TABWIRE_TRANSPORT";
pub const ENV_WS_URL: &str = "TABWIRE_WS_URL";
pub const ENV_RECONNECT_INTERVAL: &str = "TABWIRE_RECONNECT_INTERVAL";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "TABWIRE_MAX_RECONNECT_ATTEMPTS";

/// Default storage key holding the consolidated event list.
pub const DEFAULT_STORAGE_KEY: &str = "tabwire:events";

/// Which transport the factory builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportMode {
    /// Cross-tab sync through a shared storage area only.
    #[default]
    #[serde(rename = "local_storage", alias = "localStorage")]
    LocalStorage,
    /// Real-time sync through the relay only.
    #[serde(rename = "websocket")]
    WebSocket,
    /// Both, for maximum delivery reliability.
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl TransportMode {
    /// Returns true if this mode opens a socket.
    pub fn uses_websocket(&self) -> bool {
        matches!(self, TransportMode::WebSocket | TransportMode::Hybrid)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportMode::LocalStorage => "localStorage",
            TransportMode::WebSocket => "websocket",
            TransportMode::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

impl FromStr for TransportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "localstorage" | "local_storage" | "local" => Ok(TransportMode::LocalStorage),
            "websocket" | "ws" => Ok(TransportMode::WebSocket),
            "hybrid" => Ok(TransportMode::Hybrid),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// WebSocket client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Server URL (`ws://` or `wss://`). Connecting without one is an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base reconnect interval in milliseconds (default: 1000).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Reconnect attempts before the client enters `failed` (default: 10).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Heartbeat ping interval in milliseconds (default: 30000). 0 = disabled.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Extra time allowed for a pong on top of the interval (default: 10000).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Max time for one connection attempt in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Frames kept while disconnected; oldest dropped beyond this (default: 100).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_reconnect_interval_ms() -> u64 {
    1_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_queue_size() -> usize {
    100
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            url: None,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl WebSocketConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validates the URL scheme, if a URL is set.
    ///
    /// Returns an error message if the URL is invalid.
    pub fn validate_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return None;
        }
        Some(format!("invalid websocket url '{}': must start with ws:// or wss://", url))
    }
}

/// Storage-backed transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key holding the consolidated event list.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    /// Events kept in the list; oldest trimmed beyond this (default: 50).
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Age after which a stored event is pruned, in seconds (default: 300).
    #[serde(default = "default_event_ttl_secs")]
    pub event_ttl_secs: u64,
    /// Event ids remembered for deduplication (default: 1000).
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Poll interval for file-backed change detection in ms (default: 250).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_max_events() -> usize {
    50
}

fn default_event_ttl_secs() -> u64 {
    300
}

fn default_dedup_capacity() -> usize {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            storage_key: default_storage_key(),
            max_events: default_max_events(),
            event_ttl_secs: default_event_ttl_secs(),
            dedup_capacity: default_dedup_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StorageConfig {
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete transport configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl TransportConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: TransportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file if given, applies process environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => TransportConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup(ENV_TRANSPORT) {
            self.mode = mode.parse()?;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.websocket.url = if url.trim().is_empty() { None } else { Some(url) };
        }
        if let Some(value) = lookup(ENV_RECONNECT_INTERVAL) {
            self.websocket.reconnect_interval_ms = parse_env(ENV_RECONNECT_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.websocket.max_reconnect_attempts = parse_env(ENV_MAX_RECONNECT_ATTEMPTS, &value)?;
        }
        self.validate()
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(msg) = self.websocket.validate_url() {
            return Err(Error::Config(msg));
        }
        if self.storage.storage_key.is_empty() {
            return Err(Error::Config("storage_key must not be empty".to_string()));
        }
        if self.storage.max_events == 0 {
            return Err(Error::Config("max_events must be at least 1".to_string()));
        }
        if self.storage.dedup_capacity == 0 {
            return Err(Error::Config("dedup_capacity must be at least 1".to_string()));
        }
        if self.websocket.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidEnv { key: key.to_string(), value: value.to_string() })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

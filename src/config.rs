// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP/TCP port to listen on (0 = OS-assigned).
    #[serde(default)]
    pub port: u16,

    /// Room name announced to the lobby. Defaults to `<local-ip>:<port>`
    /// if left unset, computed at startup.
    #[serde(default)]
    pub room_name: Option<String>,

    /// Lobby directory base URL.
    #[serde(default = "default_lobby_url")]
    pub lobby_url: String,

    /// Group name announced alongside the room.
    #[serde(default)]
    pub group: String,

    /// Real-time thread priority hint (nice value on unix, best-effort).
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,

    /// Enable the TCP tunnel bridge.
    #[serde(default = "default_true")]
    pub tcp_bridge: bool,

    /// Ping sweep period in milliseconds.
    #[serde(default = "default_ping_period_ms")]
    pub ping_period_ms: u64,

    /// UDP receive timeout in milliseconds.
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
}

fn default_lobby_url() -> String {
    "http://oldbox.orlandoviols.com".to_string()
}

fn default_rt_priority() -> i32 {
    55
}

fn default_true() -> bool {
    true
}

fn default_ping_period_ms() -> u64 {
    50
}

fn default_recv_timeout_ms() -> u64 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            room_name: None,
            lobby_url: default_lobby_url(),
            group: String::new(),
            rt_priority: default_rt_priority(),
            tcp_bridge: default_true(),
            ping_period_ms: default_ping_period_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ping_period_ms cannot be 0".into(),
            ));
        }
        if self.lobby_url.is_empty() {
            return Err(ConfigError::InvalidValue("lobby_url cannot be empty".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert!(config.tcp_bridge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.lobby_url, parsed.lobby_url);
    }

    #[test]
    fn test_validation_zero_ping_period() {
        let config = ServerConfig {
            ping_period_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ServerConfig {
            group: "studio-a".into(),
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.group, "studio-a");
    }
}

//! Configuration management.

use crate::error::{Result, VirtmonError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Smallest accepted stats history length.
pub const MIN_HISTORY_LENGTH: usize = 10;

/// A hypervisor connection to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection URI (e.g. `sim:///default`)
    pub uri: String,

    /// Connect as soon as the daemon starts
    #[serde(default = "default_true")]
    pub autoconnect: bool,
}

fn default_true() -> bool {
    true
}

/// Persistent configuration for virtmon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub history_length: usize,
    pub poll_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub failure_threshold: u32,
    pub log_level: String,
    pub metrics_port: u16,
    pub connections: Vec<ConnectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_length: 120,
            poll_interval_ms: 1000,
            fetch_timeout_ms: 10_000,
            failure_threshold: 3,
            log_level: "info".to_string(),
            metrics_port: 9464,
            connections: vec![ConnectionConfig {
                uri: "sim:///default".to_string(),
                autoconnect: true,
            }],
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| VirtmonError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| VirtmonError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VirtmonError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| VirtmonError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| VirtmonError::IoError { path: path.to_path_buf(), source: e })
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&paths::config_path())
    }

    /// Reject configurations that cannot be clamped into something usable.
    pub fn validate(&self) -> Result<()> {
        for conn in &self.connections {
            if conn.uri.trim().is_empty() {
                return Err(VirtmonError::InvalidConfig {
                    reason: "connection uri must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Apply the documented floors.
    pub fn normalized(mut self) -> Self {
        if self.history_length < MIN_HISTORY_LENGTH {
            warn!(
                history_length = self.history_length,
                floor = MIN_HISTORY_LENGTH,
                "history_length below floor, clamping"
            );
            self.history_length = MIN_HISTORY_LENGTH;
        }
        if self.poll_interval_ms == 0 {
            warn!("poll_interval_ms must be at least 1, clamping");
            self.poll_interval_ms = 1;
        }
        if self.fetch_timeout_ms == 0 {
            warn!("fetch_timeout_ms must be at least 1, clamping");
            self.fetch_timeout_ms = 1;
        }
        if self.failure_threshold == 0 {
            self.failure_threshold = 1;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.history_length, 120);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.connections.len(), 1);
    }

    #[test]
    fn test_floors_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"history_length": 3, "poll_interval_ms": 0}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.history_length, MIN_HISTORY_LENGTH);
        assert_eq!(config.poll_interval_ms, 1);
        // untouched fields keep their defaults
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.history_length = 30;
        config.connections.push(ConnectionConfig { uri: "sim:///lab".into(), autoconnect: false });
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.history_length, 30);
        assert_eq!(loaded.connections, config.connections);
    }

    #[test]
    fn test_empty_uri_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"connections": [{"uri": " "}]}"#).unwrap();
        assert!(matches!(Config::load_from(&path), Err(VirtmonError::InvalidConfig { .. })));
    }
}

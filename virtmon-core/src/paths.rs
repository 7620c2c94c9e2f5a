//! Centralized path configuration for virtmon.

use std::path::PathBuf;

/// Get the virtmon configuration directory.
///
/// Resolution order:
/// 1. `VIRTMON_CONFIG_DIR` environment variable
/// 2. `<platform config dir>/virtmon` (e.g. `~/.config/virtmon`)
/// 3. `/etc/virtmon`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VIRTMON_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir().map(|d| d.join("virtmon")).unwrap_or_else(|| PathBuf::from("/etc/virtmon"))
}

/// Get the configuration file path.
///
/// `VIRTMON_CONFIG` overrides the location entirely.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("VIRTMON_CONFIG") {
        return PathBuf::from(path);
    }
    config_dir().join("config.json")
}

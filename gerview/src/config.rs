//! Engine configuration, loaded from `~/.config/gerview/config.toml`.
//!
//! Config errors are soft failures: a missing or unparsable file yields the
//! defaults, with a warning for the parse case. Nothing here ever panics.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location of the local review store database.
    pub store_path: String,
    /// Scroll synchronizer tick interval in milliseconds.
    pub sync_interval_ms: u64,
    /// Whether intraline edit highlights start enabled.
    pub intraline_highlights: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store_path: default_store_path(),
            sync_interval_ms: 16,
            intraline_highlights: true,
        }
    }
}

fn default_store_path() -> String {
    data_base()
        .join("gerview")
        .join("review.db")
        .to_string_lossy()
        .into_owned()
}

fn data_base() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from(".local/share"))
}

/// Prefers `$XDG_CONFIG_HOME/gerview/config.toml`; falls back to
/// `~/.config/gerview/config.toml` when the env var is absent.
pub fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("gerview").join("config.toml")
}

impl Config {
    /// Loads the config file, falling back to defaults on any failure.
    pub fn load() -> Self {
        Self::from_path(&config_path())
    }

    fn from_path(path: &std::path::Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Config::default(),
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "config parse error, using defaults");
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sync_interval_ms = 40\n").unwrap();
        let config = Config::from_path(&path);
        assert_eq!(config.sync_interval_ms, 40);
        assert!(config.intraline_highlights);
    }

    #[test]
    fn unreadable_or_broken_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = Config::from_path(&dir.path().join("nope.toml"));
        assert_eq!(missing.sync_interval_ms, 16);

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "sync_interval_ms = [oops").unwrap();
        let broken = Config::from_path(&path);
        assert_eq!(broken.sync_interval_ms, 16);
    }
}

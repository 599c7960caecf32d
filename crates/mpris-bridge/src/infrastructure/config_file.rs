//! Optional TOML configuration file.
//!
//! Looked up at `$XDG_CONFIG_HOME/mpris-bridge/config.toml` (falling back to
//! `~/.config/mpris-bridge/config.toml`) unless `--config` names a file.
//! Every key is optional:
//!
//! ```toml
//! bus_name = "org.mpris.MediaPlayer2.firefox_tab"
//! identity = "Firefox"
//! desktop_entry = "firefox"
//! log_level = "debug"
//! read_timeout_ms = 2000
//! pending_reads = "join"
//! ```
//!
//! Values from the file sit between the built-in defaults and the command
//! line: a flag given on the command line always wins.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BridgeConfig, PendingReadPolicy};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default = "default_bus_name")]
    pub bus_name: String,
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "default_desktop_entry")]
    pub desktop_entry: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deferred read timeout in milliseconds; absent or `0` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub pending_reads: PendingReadPolicy,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bus_name() -> String {
    BridgeConfig::default().bus_name
}
fn default_identity() -> String {
    BridgeConfig::default().identity
}
fn default_desktop_entry() -> String {
    BridgeConfig::default().desktop_entry
}
fn default_log_level() -> String {
    BridgeConfig::default().log_level
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bus_name: default_bus_name(),
            identity: default_identity(),
            desktop_entry: default_desktop_entry(),
            log_level: default_log_level(),
            read_timeout_ms: None,
            pending_reads: PendingReadPolicy::default(),
        }
    }
}

impl FileConfig {
    pub fn into_bridge_config(self) -> BridgeConfig {
        BridgeConfig {
            bus_name: self.bus_name,
            identity: self.identity,
            desktop_entry: self.desktop_entry,
            log_level: self.log_level,
            read_timeout: read_timeout(self.read_timeout_ms),
            pending_reads: self.pending_reads,
        }
    }
}

/// Converts a millisecond setting into a timeout; `0` means none.
pub fn read_timeout(millis: Option<u64>) -> Option<Duration> {
    millis.filter(|ms| *ms > 0).map(Duration::from_millis)
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Default location of the configuration file, if a home can be found.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("mpris-bridge").join("config.toml"))
}

/// Parses configuration text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_config(text: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Loads the configuration file.
///
/// With an explicit `path` the file must exist.  Without one, the default
/// location is tried and a missing file yields [`FileConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors (including a missing
/// explicit file) and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_file(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    match path {
        Some(path) => load_from(path, true),
        None => match default_config_path() {
            Some(path) => load_from(&path, false),
            None => Ok(FileConfig::default()),
        },
    }
}

fn load_from(path: &Path, required: bool) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            Ok(FileConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

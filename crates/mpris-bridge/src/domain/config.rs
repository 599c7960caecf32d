//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is assembled at startup from defaults, the optional TOML file and the
//! command line (in increasing precedence) by the binary, then shared as an
//! `Arc` with the session manager.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) makes sessions easy to construct in tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mpris_bridge_core::schema::mpris::BUS_NAME_PREFIX;
use serde::{Deserialize, Serialize};

/// What happens when a second read of a remote-only property (`Position`)
/// arrives while the first one is still waiting for the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingReadPolicy {
    /// The newer read replaces the older one and sends its own query.  The
    /// displaced caller receives an error reply.
    #[default]
    Replace,
    /// The newer read waits for the query already in flight; every waiting
    /// caller receives the same value.
    Join,
}

impl FromStr for PendingReadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "join" => Ok(Self::Join),
            other => Err(format!("unknown pending-read policy {other:?} (expected replace|join)")),
        }
    }
}

impl fmt::Display for PendingReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Join => "join",
        })
    }
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use mpris_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert!(cfg.bus_name.starts_with("org.mpris.MediaPlayer2."));
/// assert!(cfg.read_timeout.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Well-known bus name of the first live player.  Further concurrent
    /// players get `"{bus_name}.instance{tabId}"`.
    pub bus_name: String,

    /// Value of the `Identity` property.
    pub identity: String,

    /// Value of the `DesktopEntry` property.
    pub desktop_entry: String,

    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Upper bound on how long a deferred property read waits for the
    /// browser.  `None` waits indefinitely.
    pub read_timeout: Option<Duration>,

    /// Policy for overlapping reads of the same remote-only property.
    pub pending_reads: PendingReadPolicy,
}

impl Default for BridgeConfig {
    /// | Field           | Default                                |
    /// |-----------------|----------------------------------------|
    /// | bus_name        | `org.mpris.MediaPlayer2.browser_tab`   |
    /// | identity        | `Browser Tab`                          |
    /// | desktop_entry   | `mpris-bridge`                         |
    /// | log_level       | `info`                                 |
    /// | read_timeout    | none                                   |
    /// | pending_reads   | `replace`                              |
    fn default() -> Self {
        Self {
            bus_name: format!("{BUS_NAME_PREFIX}.browser_tab"),
            identity: "Browser Tab".to_string(),
            desktop_entry: "mpris-bridge".to_string(),
            log_level: "info".to_string(),
            read_timeout: None,
            pending_reads: PendingReadPolicy::Replace,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

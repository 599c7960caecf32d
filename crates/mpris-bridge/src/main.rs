//! MPRIS-Bridge native-messaging host: entry point.
//!
//! The browser starts this binary when the extension connects and talks to it
//! over stdin/stdout with length-prefixed JSON frames.  Every tab that plays
//! media becomes an MPRIS player on the desktop bus.
//!
//! # Usage
//!
//! ```text
//! mpris-bridge [OPTIONS] [BROWSER_ARGS]...
//!
//! Options:
//!   --bus-name <NAME>         Bus name of the first player
//!   --identity <TEXT>         Identity property
//!   --desktop-entry <NAME>    DesktopEntry property
//!   --config <PATH>           Configuration file
//!   --log-level <FILTER>      Log filter when RUST_LOG is unset
//!   --read-timeout-ms <MS>    Deferred read timeout (0 = wait forever)
//!   --pending-reads <POLICY>  replace | join
//! ```
//!
//! The browser appends its own arguments (manifest path, extension origin);
//! they are accepted and ignored.
//!
//! # Configuration precedence
//!
//! Built-in defaults < configuration file < environment variables < flags.
//!
//! | Variable                     | Flag                |
//! |------------------------------|---------------------|
//! | `MPRIS_BRIDGE_BUS_NAME`      | `--bus-name`        |
//! | `MPRIS_BRIDGE_IDENTITY`      | `--identity`        |
//! | `MPRIS_BRIDGE_DESKTOP_ENTRY` | `--desktop-entry`   |
//! | `MPRIS_BRIDGE_CONFIG`        | `--config`          |
//! | `MPRIS_BRIDGE_LOG_LEVEL`     | `--log-level`       |
//! | `MPRIS_BRIDGE_READ_TIMEOUT_MS` | `--read-timeout-ms` |
//! | `MPRIS_BRIDGE_PENDING_READS` | `--pending-reads`   |
//!
//! # Output streams
//!
//! stdout carries protocol frames only.  Logs go to stderr, which the browser
//! forwards to its own console.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mpris_bridge::application::session_manager::SessionManager;
use mpris_bridge::domain::{BridgeConfig, PendingReadPolicy};
use mpris_bridge::infrastructure::bus::LocalBus;
use mpris_bridge::infrastructure::config_file::{load_config_file, read_timeout, FileConfig};
use mpris_bridge::infrastructure::event_loop::run;
use mpris_bridge::infrastructure::stdio::{spawn_frame_pump, FrameSink};
use mpris_bridge_core::schema::mpris::MPRIS_SCHEMA;
use mpris_bridge_core::{FrameReader, SchemaRegistry};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Browser-tab MPRIS bridge.
///
/// Every flag is optional; unset flags fall back to the configuration file,
/// then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "mpris-bridge",
    about = "Exposes media-playing browser tabs as MPRIS players",
    version
)]
struct Cli {
    /// Bus name of the first live player.
    ///
    /// Further concurrent players get `<NAME>.instance<tabId>`.
    #[arg(long, env = "MPRIS_BRIDGE_BUS_NAME")]
    bus_name: Option<String>,

    /// Value of the `Identity` property.
    #[arg(long, env = "MPRIS_BRIDGE_IDENTITY")]
    identity: Option<String>,

    /// Value of the `DesktopEntry` property.
    #[arg(long, env = "MPRIS_BRIDGE_DESKTOP_ENTRY")]
    desktop_entry: Option<String>,

    /// Configuration file.  Must exist when given.
    #[arg(long, env = "MPRIS_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long, env = "MPRIS_BRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// How long a `Position` read waits for the browser, in milliseconds.
    /// `0` waits forever.
    #[arg(long, env = "MPRIS_BRIDGE_READ_TIMEOUT_MS")]
    read_timeout_ms: Option<u64>,

    /// What a second `Position` read does while one is in flight.
    #[arg(long, env = "MPRIS_BRIDGE_PENDING_READS")]
    pending_reads: Option<PendingReadPolicy>,

    /// Arguments appended by the browser (manifest path, extension origin).
    #[arg(hide = true)]
    browser_args: Vec<String>,
}

impl Cli {
    /// Layers the flags over the file configuration.
    fn into_bridge_config(self, file: FileConfig) -> BridgeConfig {
        let mut config = file.into_bridge_config();
        if let Some(bus_name) = self.bus_name {
            config.bus_name = bus_name;
        }
        if let Some(identity) = self.identity {
            config.identity = identity;
        }
        if let Some(desktop_entry) = self.desktop_entry {
            config.desktop_entry = desktop_entry;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout = read_timeout(Some(ms));
        }
        if let Some(policy) = self.pending_reads {
            config.pending_reads = policy;
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and layered over the configuration file.
/// 2. `tracing_subscriber` is initialised on stderr.  `RUST_LOG` wins over
///    the configured level.
/// 3. The MPRIS schema is parsed; a malformed schema aborts startup.
/// 4. The stdin frame pump is spawned and the bus inbox is attached.
/// 5. [`run`] serves events and calls until the browser hangs up.
///
/// The runtime is single-threaded: player state lives in `Rc`/`RefCell` and
/// is owned by the loop.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config_file(cli.config.as_deref()).context("loading configuration file")?;
    let config = cli.into_bridge_config(file);

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "MPRIS bridge starting: bus_name={}, pending_reads={}, read_timeout={:?}",
        config.bus_name, config.pending_reads, config.read_timeout
    );

    let schema = SchemaRegistry::parse(MPRIS_SCHEMA).context("parsing the MPRIS interface schema")?;

    // ── Wiring ────────────────────────────────────────────────────────────────
    let bus = LocalBus::without_journal();
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    bus.attach(calls_tx);

    let frames = spawn_frame_pump(FrameReader::new(tokio::io::stdin()));
    let timeout = config.read_timeout;
    let mut manager = SessionManager::new(
        bus,
        Arc::new(schema),
        Arc::new(config),
        Rc::new(FrameSink::stdout()),
    );

    run(&mut manager, frames, calls_rx, timeout)
        .await
        .context("browser frame stream failed")?;

    info!("MPRIS bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

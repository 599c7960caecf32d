//! mpris-bridge library crate.
//!
//! Exposes every media-playing browser tab as an MPRIS player object on the
//! desktop bus, so media keys, panel widgets and `playerctl` can control it.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser extension (length-prefixed JSON over stdin/stdout)
//!         ↕
//! [mpris-bridge]
//!   ├── domain/           Pure types: BridgeConfig, track metadata, endpoint names
//!   ├── application/      Object exporter, async property reads, player
//!   │                     sessions, session manager
//!   └── infrastructure/
//!         ├── bus/        RPC substrate boundary + in-process LocalBus
//!         ├── stdio       Frame pump from stdin, command sink to stdout
//!         ├── event_loop  Single-threaded actor loop
//!         └── config_file Optional TOML configuration
//!         ↕
//! Desktop bus clients (MPRIS method calls, property reads, signals)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `mpris-bridge-core` and the bus
//!   traits; it never touches stdin/stdout directly.
//! - `infrastructure` owns the runtime: tasks, channels, files.
//!
//! # For beginners: why a single thread?
//!
//! Every handler (inbound browser event, inbound bus call, deferred property
//! reply) runs on one loop, one at a time.  Player state is therefore owned by
//! the loop and never shared, so none of it needs a `Mutex`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: schema-driven exporting and session management.
pub mod application;

/// Infrastructure layer: bus substrate, stdio, event loop, config file.
pub mod infrastructure;

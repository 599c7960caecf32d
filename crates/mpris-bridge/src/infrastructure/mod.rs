//! Infrastructure layer of the bridge.
//!
//! Contains the runtime-facing adapters: the bus substrate, the stdin/stdout
//! frame plumbing, the single-threaded event loop and the optional
//! configuration file.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `mpris_bridge_core`.  The bus boundary types in [`bus`] are the one piece
//! the application layer imports, because they are the seam it replies and
//! emits through.

pub mod bus;
pub mod config_file;
pub mod event_loop;
pub mod stdio;

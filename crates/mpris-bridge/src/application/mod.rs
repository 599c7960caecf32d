//! Application layer of the bridge.
//!
//! # What lives here? (for beginners)
//!
//! The application layer connects the two sides of the bridge without
//! touching either transport directly:
//!
//! - browser events arrive as already-decoded [`mpris_bridge_core::InboundMessage`]s;
//! - bus calls arrive as [`crate::infrastructure::bus::MethodCall`]s;
//! - commands leave through the [`player::CommandSink`] trait;
//! - replies and signals leave through a [`crate::infrastructure::bus::BusConnection`].
//!
//! Both sinks are traits, so every use case here runs in unit tests against
//! the in-process bus and a recording sink.
//!
//! # Sub-modules
//!
//! - **`exporter`** – Generic schema-driven object: call validation, dispatch
//!   tables, `Get`/`GetAll`/`Set`, `PropertiesChanged`, error mapping.
//!
//! - **`resolver`** – Parked reads of properties that only the browser knows.
//!
//! - **`player`** – One browser tab as an MPRIS player: state cache, event
//!   application, method-to-command translation.
//!
//! - **`session_manager`** – Tab id → player, lazy creation, bus-name
//!   assignment, teardown.

pub mod exporter;
pub mod player;
pub mod resolver;
pub mod session_manager;

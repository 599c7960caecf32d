//! Domain layer for mpris-bridge.
//!
//! Pure types with no dependencies on I/O, the bus, or the async runtime.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - The track metadata aggregate and the browser's domain keys
//! - Endpoint naming rules for concurrent sessions
//!
//! # What does NOT belong here?
//!
//! - Any `tokio` types, channels or tasks
//! - File I/O or environment variable reading
//! - Bus connections

pub mod config;
pub mod endpoint;
pub mod metadata;

pub use config::{BridgeConfig, PendingReadPolicy};
pub use endpoint::endpoint_name;
pub use metadata::{DomainKey, Metadata, MetadataField};

//! # mpris-bridge-core
//!
//! Shared library for MPRIS-Bridge containing the native-messaging frame
//! codec, the JSON wire messages, the typed value model of the desktop bus,
//! the interface schema registry, and the object-path-safe track-id encoding.
//!
//! This crate has zero dependencies on a bus implementation, on process
//! startup, or on any particular media source.
//!
//! # Architecture overview
//!
//! MPRIS-Bridge exposes every media-playing browser tab as a desktop
//! "player" object.  The browser extension talks to the bridge over a
//! length-prefixed JSON byte stream (the browser's native-messaging pipe);
//! desktop clients talk to the bridge over an RPC bus using the MPRIS
//! interfaces.
//!
//! This crate (`mpris-bridge-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the browser pipe.  Every message
//!   is a 4-byte native-endian length followed by that many bytes of UTF-8
//!   JSON.
//!
//! - **`value`** – The typed values the bus carries (`s`, `x`, `a{sv}`, ...)
//!   and the conversions between them and untyped JSON.
//!
//! - **`schema`** – A parsed, immutable description of the interfaces an
//!   exported object implements (methods, properties, signals).
//!
//! - **`track_id`** – The reversible encoding that turns an arbitrary
//!   browser-side track id into a legal object-path element.

pub mod protocol;
pub mod schema;
pub mod track_id;
pub mod value;

// Re-export the most-used types at the crate root so callers can write
// `mpris_bridge_core::SchemaRegistry` instead of the full module path.
pub use protocol::frame::{FrameReader, FrameWriter, FramingError};
pub use protocol::messages::{decode_inbound, Command, InboundMessage, MessageKind, ProtocolError, TabId};
pub use schema::{
    Access, ArgDescriptor, EmitsChange, InterfaceDescriptor, MethodDescriptor, PropertyDescriptor,
    SchemaError, SchemaRegistry, SignalDescriptor,
};
pub use track_id::{decode_path_id, encode_path_id, track_id_from_path, track_path, TrackIdError, NO_TRACK};
pub use value::{TypeTag, Value, ValueError};

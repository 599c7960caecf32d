//! Boundary to the desktop RPC substrate.
//!
//! The bridge does not implement the bus wire protocol.  It needs exactly four
//! things from a connection: its name, a way to answer a call, a way to emit a
//! signal, and a way to let go.  [`BusConnection`] and [`BusProvider`] capture
//! that; [`local::LocalBus`] is the in-process implementation used by the
//! tests and by the binary.
//!
//! ```text
//!  bus client ──MethodCall──► event loop ──► SessionManager ──► ExportedObject
//!  bus client ◄──reply/error── BusConnection ◄──────────────────────┘
//!  bus client ◄──Signal─────── BusConnection ◄── PlayerSession
//! ```

pub mod local;

pub use local::{LocalBus, LocalConnection};

use mpris_bridge_core::Value;
use thiserror::Error;

/// Error type for substrate operations.
#[derive(Debug, Error, PartialEq)]
pub enum BusError {
    /// The requested well-known name is owned by another connection.
    #[error("bus name {0:?} is already in use")]
    NameInUse(String),

    /// The connection was closed.
    #[error("connection for {0:?} is closed")]
    Disconnected(String),

    /// No connection owns the destination of a call.
    #[error("no owner for bus name {0:?}")]
    ServiceUnknown(String),
}

/// An incoming method call addressed to an exported object.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Identifies the call when the reply is sent.
    pub serial: u64,
    /// Well-known name the caller addressed.
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// A typed error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Symbolic error name, e.g. `org.freedesktop.DBus.Error.UnknownMethod`.
    pub name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// The answer to one [`MethodCall`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Return(Vec<Value>),
    Error(RemoteError),
}

/// A signal emitted by an exported object.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

/// One claimed endpoint on the bus.
///
/// Connections are cheap handles: cloning one yields another handle to the
/// same endpoint, which is how a deferred reply outlives the call that
/// started it.
pub trait BusConnection: Clone {
    /// The well-known name this connection owns.
    fn endpoint(&self) -> &str;

    /// Sends the reply to call `serial`.
    fn reply(&self, serial: u64, outcome: CallOutcome) -> Result<(), BusError>;

    /// Broadcasts a signal from this endpoint.
    fn emit(&self, signal: Signal) -> Result<(), BusError>;

    /// Releases the name and closes the connection.  Idempotent.
    fn close(&self);
}

/// Opens connections, one per exported endpoint.
pub trait BusProvider {
    type Connection: BusConnection;

    /// Opens a fresh connection and claims `endpoint` on it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NameInUse`] if another connection owns the name.
    fn connect(&self, endpoint: &str) -> Result<Self::Connection, BusError>;
}

//! In-process bus substrate.
//!
//! [`LocalBus`] keeps a name registry and, optionally, a journal of every
//! reply and signal so tests can assert on them.  Calls are injected with
//! [`LocalBus::call`] and delivered to the event loop's call inbox.
//!
//! The binary also runs on a `LocalBus` (journal disabled, signals logged);
//! an adapter for the real desktop bus plugs in through the same two traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mpris_bridge_core::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use super::{BusConnection, BusError, BusProvider, CallOutcome, MethodCall, Signal};

/// A reply recorded by the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct SentReply {
    pub endpoint: String,
    pub serial: u64,
    pub outcome: CallOutcome,
}

/// A signal recorded by the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct SentSignal {
    pub endpoint: String,
    pub signal: Signal,
}

#[derive(Default)]
struct LocalState {
    /// Well-known name → owning connection id.  Id 0 is "someone else".
    owners: HashMap<String, u64>,
    next_connection: u64,
    next_serial: u64,
    journal: bool,
    replies: Vec<SentReply>,
    signals: Vec<SentSignal>,
    inbox: Option<UnboundedSender<MethodCall>>,
}

/// In-process RPC substrate.  Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<LocalState>>,
}

impl LocalBus {
    /// Creates a bus that journals replies and signals.
    pub fn new() -> Self {
        let bus = Self::default();
        bus.lock().journal = true;
        bus
    }

    /// Creates a bus that only logs replies and signals.
    pub fn without_journal() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes future [`LocalBus::call`]s into `inbox`.
    pub fn attach(&self, inbox: UnboundedSender<MethodCall>) {
        self.lock().inbox = Some(inbox);
    }

    /// Marks `name` as owned by a connection outside this process.
    pub fn claim_external(&self, name: &str) {
        self.lock().owners.insert(name.to_string(), 0);
    }

    /// Returns `true` if some connection owns `name`.
    pub fn is_owned(&self, name: &str) -> bool {
        self.lock().owners.contains_key(name)
    }

    /// Owned names in sorted order.
    pub fn owned_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().owners.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sends a method call to `destination` and returns its serial.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ServiceUnknown`] if no connection owns
    /// `destination`, or [`BusError::Disconnected`] if no event loop is
    /// attached.
    pub fn call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        args: Vec<Value>,
    ) -> Result<u64, BusError> {
        let mut state = self.lock();
        if !state.owners.contains_key(destination) {
            return Err(BusError::ServiceUnknown(destination.to_string()));
        }
        state.next_serial += 1;
        let call = MethodCall {
            serial: state.next_serial,
            destination: destination.to_string(),
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        };
        let serial = call.serial;
        let inbox = state
            .inbox
            .as_ref()
            .ok_or_else(|| BusError::Disconnected(destination.to_string()))?;
        inbox
            .send(call)
            .map_err(|_| BusError::Disconnected(destination.to_string()))?;
        Ok(serial)
    }

    /// Drains the reply journal.
    pub fn take_replies(&self) -> Vec<SentReply> {
        std::mem::take(&mut self.lock().replies)
    }

    /// Drains the signal journal.
    pub fn take_signals(&self) -> Vec<SentSignal> {
        std::mem::take(&mut self.lock().signals)
    }

    /// Returns the journaled reply to `serial`, if any.
    pub fn reply_to(&self, serial: u64) -> Option<CallOutcome> {
        self.lock()
            .replies
            .iter()
            .find(|r| r.serial == serial)
            .map(|r| r.outcome.clone())
    }
}

impl BusProvider for LocalBus {
    type Connection = LocalConnection;

    fn connect(&self, endpoint: &str) -> Result<LocalConnection, BusError> {
        let mut state = self.lock();
        if state.owners.contains_key(endpoint) {
            return Err(BusError::NameInUse(endpoint.to_string()));
        }
        state.next_connection += 1;
        let id = state.next_connection;
        state.owners.insert(endpoint.to_string(), id);
        debug!("claimed bus name {endpoint}");
        Ok(LocalConnection {
            bus: self.clone(),
            endpoint: endpoint.to_string(),
            id,
        })
    }
}

/// Handle to one endpoint on a [`LocalBus`].
#[derive(Clone)]
pub struct LocalConnection {
    bus: LocalBus,
    endpoint: String,
    id: u64,
}

impl LocalConnection {
    /// Locks the bus and fails if this connection no longer owns its name.
    fn live_state(&self) -> Result<MutexGuard<'_, LocalState>, BusError> {
        let state = self.bus.lock();
        if state.owners.get(&self.endpoint) != Some(&self.id) {
            return Err(BusError::Disconnected(self.endpoint.clone()));
        }
        Ok(state)
    }
}

impl BusConnection for LocalConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn reply(&self, serial: u64, outcome: CallOutcome) -> Result<(), BusError> {
        let mut state = self.live_state()?;
        trace!(endpoint = %self.endpoint, serial, ?outcome, "reply");
        if state.journal {
            state.replies.push(SentReply {
                endpoint: self.endpoint.clone(),
                serial,
                outcome,
            });
        }
        Ok(())
    }

    fn emit(&self, signal: Signal) -> Result<(), BusError> {
        let mut state = self.live_state()?;
        debug!(
            endpoint = %self.endpoint,
            "signal {}.{} {:?}",
            signal.interface,
            signal.member,
            signal.args
        );
        if state.journal {
            state.signals.push(SentSignal {
                endpoint: self.endpoint.clone(),
                signal,
            });
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.bus.lock();
        if state.owners.get(&self.endpoint) == Some(&self.id) {
            state.owners.remove(&self.endpoint);
            debug!("released bus name {}", self.endpoint);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_connect_claims_name_once() {
        // Arrange
        let bus = LocalBus::new();

        // Act
        let first = bus.connect("org.example.A");
        let second = bus.connect("org.example.A");

        // Assert
        assert!(first.is_ok());
        assert_eq!(
            second.err(),
            Some(BusError::NameInUse("org.example.A".to_string()))
        );
    }

    #[test]
    fn test_externally_claimed_name_is_in_use() {
        let bus = LocalBus::new();
        bus.claim_external("org.example.Taken");
        assert!(matches!(
            bus.connect("org.example.Taken"),
            Err(BusError::NameInUse(_))
        ));
    }

    #[test]
    fn test_close_releases_name_and_disconnects_clones() {
        // Arrange
        let bus = LocalBus::new();
        let conn = bus.connect("org.example.A").unwrap();
        let clone = conn.clone();

        // Act
        conn.close();

        // Assert
        assert!(!bus.is_owned("org.example.A"));
        assert!(matches!(
            clone.reply(1, CallOutcome::Return(vec![])),
            Err(BusError::Disconnected(_))
        ));
    }

    #[test]
    fn test_stale_connection_cannot_close_new_owner() {
        let bus = LocalBus::new();
        let old = bus.connect("org.example.A").unwrap();
        old.close();
        let _new = bus.connect("org.example.A").unwrap();

        old.close();

        assert!(bus.is_owned("org.example.A"));
    }

    #[test]
    fn test_journal_records_replies_and_signals() {
        let bus = LocalBus::new();
        let conn = bus.connect("org.example.A").unwrap();

        conn.reply(7, CallOutcome::Return(vec![Value::Bool(true)]))
            .unwrap();
        conn.emit(Signal {
            path: "/".to_string(),
            interface: "org.example.I".to_string(),
            member: "Ping".to_string(),
            args: vec![],
        })
        .unwrap();

        assert_eq!(
            bus.reply_to(7),
            Some(CallOutcome::Return(vec![Value::Bool(true)]))
        );
        assert_eq!(bus.take_signals().len(), 1);
        assert!(bus.take_signals().is_empty(), "take drains the journal");
    }

    #[test]
    fn test_without_journal_records_nothing() {
        let bus = LocalBus::without_journal();
        let conn = bus.connect("org.example.A").unwrap();
        conn.reply(1, CallOutcome::Return(vec![])).unwrap();
        assert!(bus.take_replies().is_empty());
    }

    #[test]
    fn test_call_is_delivered_to_attached_inbox() {
        // Arrange
        let bus = LocalBus::new();
        let _conn = bus.connect("org.example.A").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.attach(tx);

        // Act
        let serial = bus
            .call("org.example.A", "/", "org.example.I", "Ping", vec![])
            .unwrap();

        // Assert
        let call = rx.try_recv().unwrap();
        assert_eq!(call.serial, serial);
        assert_eq!(call.member, "Ping");
    }

    #[test]
    fn test_call_to_unowned_name_fails() {
        let bus = LocalBus::new();
        assert_eq!(
            bus.call("org.example.Nobody", "/", "i.I", "M", vec![]),
            Err(BusError::ServiceUnknown("org.example.Nobody".to_string()))
        );
    }
}

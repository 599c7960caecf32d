//! SessionManager: maps browser tab ids to exported players.
//!
//! The manager owns every live [`RemotePlayer`].  It creates a player lazily
//! on the first `change`/`update` event of an unknown tab, routes later events
//! and bus calls to it, and unpublishes it on `quit`.
//!
//! # Bus names
//!
//! The first live player takes the configured base name.  While any player is
//! live, a new one takes `"{base}.instance{tabId}"`
//! (see [`crate::domain::endpoint_name`]), so names depend only on the number
//! of live sessions at creation time.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use mpris_bridge_core::{InboundMessage, MessageKind, SchemaRegistry, TabId};
use tracing::{debug, info, warn};

use super::exporter::ExportError;
use super::player::{CommandSink, PlayerSession, RemotePlayer};
use crate::domain::{endpoint_name, BridgeConfig};
use crate::infrastructure::bus::{BusProvider, MethodCall};

/// Registry of live player sessions, keyed by tab id.
pub struct SessionManager<P: BusProvider> {
    provider: P,
    schema: Arc<SchemaRegistry>,
    config: Arc<BridgeConfig>,
    sink: Rc<dyn CommandSink>,
    sessions: BTreeMap<TabId, Box<dyn RemotePlayer>>,
}

impl<P> SessionManager<P>
where
    P: BusProvider,
    P::Connection: 'static,
{
    pub fn new(
        provider: P,
        schema: Arc<SchemaRegistry>,
        config: Arc<BridgeConfig>,
        sink: Rc<dyn CommandSink>,
    ) -> Self {
        Self {
            provider,
            schema,
            config,
            sink,
            sessions: BTreeMap::new(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.sessions.contains_key(&tab)
    }

    /// Bus name of the session for `tab`, if it is live.
    pub fn endpoint_of(&self, tab: TabId) -> Option<&str> {
        self.sessions.get(&tab).map(|s| s.endpoint())
    }

    /// Handles one decoded browser message.
    pub fn on_inbound_message(&mut self, msg: InboundMessage) {
        let tab = msg.tab_id;
        match msg.kind {
            MessageKind::Change | MessageKind::Update => {
                if !self.sessions.contains_key(&tab) {
                    match self.open(tab) {
                        Ok(session) => {
                            self.sessions.insert(tab, session);
                        }
                        Err(e) => {
                            warn!(tab = %tab, "cannot export player, event dropped: {e}");
                            return;
                        }
                    }
                }
                if let Some(session) = self.sessions.get_mut(&tab) {
                    session.apply_event(&msg.data);
                }
            }
            MessageKind::Quit => match self.sessions.remove(&tab) {
                Some(session) => session.unpublish(),
                None => debug!(tab = %tab, "quit for unknown tab ignored"),
            },
            MessageKind::Unknown(kind) => {
                debug!(tab = %tab, "ignoring message type {kind:?}");
            }
        }
    }

    fn open(&self, tab: TabId) -> Result<Box<dyn RemotePlayer>, ExportError> {
        let endpoint = endpoint_name(&self.config.bus_name, tab, self.sessions.len());
        let session = PlayerSession::start(
            &self.provider,
            &endpoint,
            &self.schema,
            tab,
            Rc::clone(&self.sink),
            &self.config,
        )?;
        Ok(Box::new(session))
    }

    /// Delivers a bus call to the session owning its destination name.
    pub fn route_call(&mut self, call: MethodCall) {
        match self
            .sessions
            .values_mut()
            .find(|s| s.endpoint() == call.destination)
        {
            Some(session) => session.handle_call(call),
            None => warn!(
                "call {}.{} for {} has no live session",
                call.interface, call.member, call.destination
            ),
        }
    }

    /// Fails reads that waited longer than the configured timeout.  A no-op
    /// without a timeout.
    pub fn expire_pending_reads(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.config.read_timeout else {
            return 0;
        };
        self.sessions
            .values_mut()
            .map(|s| s.expire_pending_reads(now, timeout))
            .sum()
    }

    /// Unpublishes every session.
    pub fn shutdown(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        if !sessions.is_empty() {
            info!("unpublishing {} player sessions", sessions.len());
        }
        for session in sessions.into_values() {
            session.unpublish();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

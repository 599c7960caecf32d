//! One browser tab exported as an MPRIS player.
//!
//! A [`PlayerSession`] pairs an [`ExportedObject`] at `/org/mpris/MediaPlayer2`
//! with a [`PlayerState`] cache of every MPRIS property.  It moves data in two
//! directions:
//!
//! - **Inbound** (browser → bus): [`RemotePlayer::apply_event`] folds the
//!   event's domain keys into the cache, completes parked reads and emits
//!   `PropertiesChanged` / `Seeked`.
//! - **Outbound** (bus → browser): method calls and property writes become
//!   [`Command`]s.  The cache is not touched; it changes when the browser
//!   reports the new state.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► Active ──unpublish()──► Terminated (endpoint released)
//! ```
//!
//! `unpublish` consumes the session, so a terminated player cannot be used.

use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use mpris_bridge_core::schema::mpris::{OBJECT_PATH, PLAYER_INTERFACE, ROOT_INTERFACE};
use mpris_bridge_core::{
    track_id_from_path, Command, SchemaRegistry, TabId, TypeTag, Value, ValueError, NO_TRACK,
};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info, warn};

use super::exporter::{
    DispatchTable, DispatchTarget, ExportError, ExportedObject, HandlerError, PropertyValue,
    Readout,
};
use crate::domain::{BridgeConfig, DomainKey, Metadata};
use crate::infrastructure::bus::{BusConnection, BusProvider, MethodCall};

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Outbound half of the browser channel.
///
/// The infrastructure implementation writes a frame to stdout; tests record
/// the commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink {
    /// Sends one command.  Returns the bytes written, `0` when the command
    /// was dropped.  Never blocks on a reply.
    fn send(&self, command: &Command) -> usize;
}

/// A media source exported on the bus.
///
/// [`PlayerSession`] (a browser tab) is the only implementation; a second
/// kind of source would be a second implementation, not a subtype.
pub trait RemotePlayer {
    fn tab_id(&self) -> TabId;

    /// Bus name this player is reachable at.
    fn endpoint(&self) -> &str;

    /// Applies the `data` of a `change`/`update` event.
    fn apply_event(&mut self, data: &Map<String, JsonValue>);

    /// Sends `cmd` to the browser tab.  Returns the bytes written, `0` if the
    /// command was dropped (e.g. `data` has no JSON form).
    fn issue_command(&self, cmd: &str, data: Option<&Value>) -> usize;

    /// Handles a bus call addressed to this player's endpoint.
    fn handle_call(&mut self, call: MethodCall);

    /// Fails reads that waited longer than `timeout` for the browser.
    fn expire_pending_reads(&mut self, now: Instant, timeout: Duration) -> usize;

    /// Fails parked reads and releases the endpoint.
    fn unpublish(self: Box<Self>);
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Cached values of every property on the root and player interfaces.
pub struct PlayerState {
    tab_id: TabId,
    sink: Rc<dyn CommandSink>,

    // org.mpris.MediaPlayer2
    can_quit: bool,
    fullscreen: bool,
    can_set_fullscreen: bool,
    can_raise: bool,
    has_track_list: bool,
    identity: String,
    desktop_entry: String,
    supported_uri_schemes: Vec<String>,
    supported_mime_types: Vec<String>,

    // org.mpris.MediaPlayer2.Player
    playback_status: String,
    loop_status: String,
    rate: f64,
    shuffle: bool,
    metadata: Metadata,
    volume: f64,
    position: i64,
    minimum_rate: f64,
    maximum_rate: f64,
    can_go_next: bool,
    can_go_previous: bool,
    can_play: bool,
    can_pause: bool,
    can_seek: bool,
    can_control: bool,
}

fn mismatch(expected: &str, json: &JsonValue) -> ValueError {
    ValueError::TypeMismatch {
        expected: expected.to_string(),
        found: json.to_string(),
    }
}

fn json_bool(json: &JsonValue) -> Result<bool, ValueError> {
    json.as_bool().ok_or_else(|| mismatch("b", json))
}

fn json_f64(json: &JsonValue) -> Result<f64, ValueError> {
    json.as_f64().ok_or_else(|| mismatch("d", json))
}

fn json_i64(json: &JsonValue) -> Result<i64, ValueError> {
    Value::from_json(json, &TypeTag::Int64)?
        .as_i64()
        .ok_or_else(|| mismatch("x", json))
}

fn json_string(json: &JsonValue) -> Result<String, ValueError> {
    json.as_str()
        .map(str::to_string)
        .ok_or_else(|| mismatch("s", json))
}

fn json_strings(json: &JsonValue) -> Result<Vec<String>, ValueError> {
    serde_json::from_value(json.clone()).map_err(|_| mismatch("as", json))
}

fn string_array(items: &[String]) -> Value {
    Value::Array {
        elem: TypeTag::Str,
        items: items.iter().map(Value::string).collect(),
    }
}

impl PlayerState {
    pub fn new(tab_id: TabId, sink: Rc<dyn CommandSink>, config: &BridgeConfig) -> Self {
        Self {
            tab_id,
            sink,
            can_quit: false,
            fullscreen: false,
            can_set_fullscreen: true,
            can_raise: false,
            has_track_list: false,
            identity: config.identity.clone(),
            desktop_entry: config.desktop_entry.clone(),
            supported_uri_schemes: vec!["http".to_string(), "https".to_string()],
            supported_mime_types: Vec::new(),
            playback_status: "Stopped".to_string(),
            loop_status: "None".to_string(),
            rate: 1.0,
            shuffle: false,
            metadata: Metadata::default(),
            volume: 1.0,
            position: 0,
            minimum_rate: 1.0,
            maximum_rate: 1.0,
            can_go_next: true,
            can_go_previous: true,
            can_play: true,
            can_pause: true,
            can_seek: true,
            can_control: true,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Last position reported by the browser, in microseconds.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Current value of a property, `None` for names this player lacks.
    pub fn read(&self, name: &str) -> Option<PropertyValue> {
        let value = match name {
            "CanQuit" => Value::Bool(self.can_quit),
            "Fullscreen" => Value::Bool(self.fullscreen),
            "CanSetFullscreen" => Value::Bool(self.can_set_fullscreen),
            "CanRaise" => Value::Bool(self.can_raise),
            "HasTrackList" => Value::Bool(self.has_track_list),
            "Identity" => Value::string(&self.identity),
            "DesktopEntry" => Value::string(&self.desktop_entry),
            "SupportedUriSchemes" => string_array(&self.supported_uri_schemes),
            "SupportedMimeTypes" => string_array(&self.supported_mime_types),
            "PlaybackStatus" => Value::string(&self.playback_status),
            "LoopStatus" => Value::string(&self.loop_status),
            "Rate" => Value::Double(self.rate),
            "Shuffle" => Value::Bool(self.shuffle),
            "Metadata" => self.metadata.to_value(),
            "Volume" => Value::Double(self.volume),
            "Position" => Value::Int64(self.position),
            "MinimumRate" => Value::Double(self.minimum_rate),
            "MaximumRate" => Value::Double(self.maximum_rate),
            "CanGoNext" => Value::Bool(self.can_go_next),
            "CanGoPrevious" => Value::Bool(self.can_go_previous),
            "CanPlay" => Value::Bool(self.can_play),
            "CanPause" => Value::Bool(self.can_pause),
            "CanSeek" => Value::Bool(self.can_seek),
            "CanControl" => Value::Bool(self.can_control),
            _ => return None,
        };
        Some(PropertyValue::Typed(value))
    }

    /// Stores a value reported by the browser under a property name.
    ///
    /// # Errors
    ///
    /// [`ValueError`] if the value does not fit the property; the cache is
    /// left unchanged.
    pub fn store(&mut self, name: &str, json: &JsonValue) -> Result<(), ValueError> {
        match name {
            "CanQuit" => self.can_quit = json_bool(json)?,
            "Fullscreen" => self.fullscreen = json_bool(json)?,
            "CanSetFullscreen" => self.can_set_fullscreen = json_bool(json)?,
            "CanRaise" => self.can_raise = json_bool(json)?,
            "HasTrackList" => self.has_track_list = json_bool(json)?,
            "Identity" => self.identity = json_string(json)?,
            "DesktopEntry" => self.desktop_entry = json_string(json)?,
            "SupportedUriSchemes" => self.supported_uri_schemes = json_strings(json)?,
            "SupportedMimeTypes" => self.supported_mime_types = json_strings(json)?,
            "PlaybackStatus" => self.playback_status = json_string(json)?,
            "LoopStatus" => self.loop_status = json_string(json)?,
            "Rate" => self.rate = json_f64(json)?,
            "Shuffle" => self.shuffle = json_bool(json)?,
            "Volume" => self.volume = json_f64(json)?,
            "Position" => self.position = json_i64(json)?,
            "MinimumRate" => self.minimum_rate = json_f64(json)?,
            "MaximumRate" => self.maximum_rate = json_f64(json)?,
            "CanGoNext" => self.can_go_next = json_bool(json)?,
            "CanGoPrevious" => self.can_go_previous = json_bool(json)?,
            "CanPlay" => self.can_play = json_bool(json)?,
            "CanPause" => self.can_pause = json_bool(json)?,
            "CanSeek" => self.can_seek = json_bool(json)?,
            "CanControl" => self.can_control = json_bool(json)?,
            // Metadata is assembled from the track keys.
            _ => return Err(mismatch("a track key", json)),
        }
        Ok(())
    }

    /// Sends a command for this tab through the sink.
    fn command(&self, cmd: &str, data: Option<JsonValue>) -> usize {
        let command = match data {
            Some(data) => Command::with_data(self.tab_id, cmd, data),
            None => Command::new(self.tab_id, cmd),
        };
        let written = self.sink.send(&command);
        if written == 0 {
            debug!(tab = %self.tab_id, "command {cmd} was dropped");
        }
        written
    }

    /// Sends a command whose argument is a bus value.  A value with no JSON
    /// form (a non-finite double) drops the command and returns `0`.
    fn command_with_value(&self, cmd: &str, data: Option<&Value>) -> usize {
        match data.map(Value::to_json) {
            None => self.command(cmd, None),
            Some(Some(json)) => self.command(cmd, Some(json)),
            Some(None) => {
                debug!(tab = %self.tab_id, "command {cmd} dropped: argument has no JSON form");
                0
            }
        }
    }
}

// ── Dispatch table ────────────────────────────────────────────────────────────

type HandlerResult = Result<Vec<PropertyValue>, HandlerError>;

fn send_plain(state: &PlayerState, cmd: &str) -> HandlerResult {
    state.command(cmd, None);
    Ok(Vec::new())
}

fn no_op(_: &mut PlayerState, _: &[Value]) -> HandlerResult {
    Ok(Vec::new())
}

fn play(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "play")
}

fn pause(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "pause")
}

fn play_pause(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "playPause")
}

fn stop(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "stop")
}

fn next(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "next")
}

fn previous(state: &mut PlayerState, _: &[Value]) -> HandlerResult {
    send_plain(state, "previous")
}

fn seek(state: &mut PlayerState, args: &[Value]) -> HandlerResult {
    let offset = args
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| HandlerError::InvalidArgs("Seek needs an offset".to_string()))?;
    state.command("seek", Some(json!(offset)));
    Ok(Vec::new())
}

fn set_position(state: &mut PlayerState, args: &[Value]) -> HandlerResult {
    let (Some(path), Some(position)) = (
        args.first().and_then(Value::as_str),
        args.get(1).and_then(Value::as_i64),
    ) else {
        return Err(HandlerError::InvalidArgs(
            "SetPosition needs a track id and a position".to_string(),
        ));
    };
    if path == NO_TRACK {
        debug!(tab = %state.tab_id, "SetPosition on NoTrack ignored");
        return Ok(Vec::new());
    }
    let track_id =
        track_id_from_path(path).map_err(|e| HandlerError::InvalidTrackId(e.to_string()))?;
    state.command(
        "setPosition",
        Some(json!({ "trackId": track_id, "position": position })),
    );
    Ok(Vec::new())
}

fn open_uri(state: &mut PlayerState, args: &[Value]) -> HandlerResult {
    let uri = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidArgs("OpenUri needs a URI".to_string()))?;
    state.command("openUri", Some(json!(uri)));
    Ok(Vec::new())
}

fn cached(state: &PlayerState, name: &str) -> Readout {
    match state.read(name) {
        Some(value) => Readout::Ready(value),
        None => Readout::Ready(PropertyValue::Json(JsonValue::Null)),
    }
}

fn remote(state: &PlayerState, name: &str) -> Readout {
    match state.read(name) {
        Some(value) => Readout::Remote(value),
        None => Readout::Remote(PropertyValue::Json(JsonValue::Null)),
    }
}

/// Forwards a property write to the browser as `set<Name>`.  The write is
/// accepted even when the command is dropped.
fn forward_write(state: &mut PlayerState, name: &str, value: &Value) -> Result<(), HandlerError> {
    state.command_with_value(&format!("set{name}"), Some(value));
    Ok(())
}

fn build_table() -> DispatchTable<PlayerState> {
    let mut table = DispatchTable::new()
        .method(ROOT_INTERFACE, "Raise", no_op)
        .method(ROOT_INTERFACE, "Quit", no_op)
        .method(PLAYER_INTERFACE, "Play", play)
        .method(PLAYER_INTERFACE, "Pause", pause)
        .method(PLAYER_INTERFACE, "PlayPause", play_pause)
        .method(PLAYER_INTERFACE, "Stop", stop)
        .method(PLAYER_INTERFACE, "Next", next)
        .method(PLAYER_INTERFACE, "Previous", previous)
        .method(PLAYER_INTERFACE, "Seek", seek)
        .method(PLAYER_INTERFACE, "SetPosition", set_position)
        .method(PLAYER_INTERFACE, "OpenUri", open_uri)
        .read_write(ROOT_INTERFACE, "Fullscreen", cached, forward_write)
        .read_write(PLAYER_INTERFACE, "LoopStatus", cached, forward_write)
        .read_write(PLAYER_INTERFACE, "Rate", cached, forward_write)
        .read_write(PLAYER_INTERFACE, "Shuffle", cached, forward_write)
        .read_write(PLAYER_INTERFACE, "Volume", cached, forward_write)
        .read_only(PLAYER_INTERFACE, "Position", remote);

    for name in [
        "CanQuit",
        "CanSetFullscreen",
        "CanRaise",
        "HasTrackList",
        "Identity",
        "DesktopEntry",
        "SupportedUriSchemes",
        "SupportedMimeTypes",
    ] {
        table = table.read_only(ROOT_INTERFACE, name, cached);
    }
    for name in [
        "PlaybackStatus",
        "Metadata",
        "MinimumRate",
        "MaximumRate",
        "CanGoNext",
        "CanGoPrevious",
        "CanPlay",
        "CanPause",
        "CanSeek",
        "CanControl",
    ] {
        table = table.read_only(PLAYER_INTERFACE, name, cached);
    }
    table
}

impl DispatchTarget for PlayerState {
    fn dispatch_table() -> &'static DispatchTable<Self> {
        static TABLE: OnceLock<DispatchTable<PlayerState>> = OnceLock::new();
        TABLE.get_or_init(build_table)
    }

    fn query_remote(&mut self, property: &str) {
        self.command(&format!("get{property}"), None);
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A browser tab exported as an MPRIS player.
pub struct PlayerSession<C: BusConnection> {
    object: ExportedObject<C>,
    state: PlayerState,
}

impl<C: BusConnection + 'static> PlayerSession<C> {
    /// Claims `endpoint` and exports the root and player interfaces.
    ///
    /// # Errors
    ///
    /// [`ExportError`] if the schema lacks an MPRIS interface or the endpoint
    /// is already owned.
    pub fn start<P>(
        provider: &P,
        endpoint: &str,
        schema: &SchemaRegistry,
        tab_id: TabId,
        sink: Rc<dyn CommandSink>,
        config: &BridgeConfig,
    ) -> Result<Self, ExportError>
    where
        P: BusProvider<Connection = C>,
    {
        let object = ExportedObject::register(
            provider,
            endpoint,
            OBJECT_PATH,
            schema,
            &[ROOT_INTERFACE, PLAYER_INTERFACE],
            config.pending_reads,
        )?;
        info!(tab = %tab_id, "player session started on {endpoint}");
        Ok(Self {
            object,
            state: PlayerState::new(tab_id, sink, config),
        })
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn object(&self) -> &ExportedObject<C> {
        &self.object
    }

    /// Emits the changed properties, root interface first, then one batch
    /// for the player interface.
    fn announce(&self, changed: &[String]) {
        let mut root = Vec::new();
        let mut player = Vec::new();
        for name in changed {
            let Some(value) = self.state.read(name) else {
                continue;
            };
            match self.object.owner_of(name) {
                Some(ROOT_INTERFACE) => root.push((name.as_str(), value)),
                _ => player.push((name.as_str(), value)),
            }
        }
        for (interface, batch) in [(ROOT_INTERFACE, root), (PLAYER_INTERFACE, player)] {
            if batch.is_empty() {
                continue;
            }
            if let Err(e) = self.object.emit_properties_changed(interface, &batch, &[]) {
                warn!(tab = %self.state.tab_id, "PropertiesChanged on {interface} failed: {e}");
            }
        }
    }

    fn seeked(&mut self, json: &JsonValue) {
        match json_i64(json) {
            Ok(position) => {
                self.state.position = position;
                if let Err(e) =
                    self.object
                        .emit_signal(PLAYER_INTERFACE, "Seeked", &[Value::Int64(position).into()])
                {
                    warn!(tab = %self.state.tab_id, "Seeked failed: {e}");
                }
            }
            Err(e) => warn!(tab = %self.state.tab_id, "ignoring seekedTo: {e}"),
        }
    }
}

impl<C: BusConnection + 'static> RemotePlayer for PlayerSession<C> {
    fn tab_id(&self) -> TabId {
        self.state.tab_id
    }

    fn endpoint(&self) -> &str {
        self.object.endpoint()
    }

    fn apply_event(&mut self, data: &Map<String, JsonValue>) {
        let mut changed: Vec<String> = Vec::new();
        let mut metadata_changed = false;

        for (key, value) in data {
            let property = if key == "position" { "Position" } else { key.as_str() };
            self.object.resolve(property, value);

            match DomainKey::classify(key) {
                DomainKey::Metadata(field) => match self.state.metadata.apply(field, value) {
                    Ok(_) => metadata_changed = true,
                    Err(e) => warn!(tab = %self.state.tab_id, "ignoring {key}: {e}"),
                },
                DomainKey::Position => match json_i64(value) {
                    Ok(position) => self.state.position = position,
                    Err(e) => warn!(tab = %self.state.tab_id, "ignoring position: {e}"),
                },
                DomainKey::SeekedTo => self.seeked(value),
                DomainKey::Property(name) => {
                    if self.object.owner_of(name).is_none() {
                        warn!(tab = %self.state.tab_id, "ignoring undeclared property {name}");
                        continue;
                    }
                    match self.state.store(name, value) {
                        Ok(()) if !changed.iter().any(|c| c == name) => {
                            changed.push(name.to_string())
                        }
                        Ok(()) => {}
                        Err(e) => warn!(tab = %self.state.tab_id, "ignoring {name}: {e}"),
                    }
                }
            }
        }

        if metadata_changed {
            changed.push("Metadata".to_string());
        }
        self.announce(&changed);
    }

    fn issue_command(&self, cmd: &str, data: Option<&Value>) -> usize {
        self.state.command_with_value(cmd, data)
    }

    fn handle_call(&mut self, call: MethodCall) {
        self.object.dispatch(&mut self.state, call);
    }

    fn expire_pending_reads(&mut self, now: Instant, timeout: Duration) -> usize {
        self.object.expire_pending(now, timeout)
    }

    fn unpublish(self: Box<Self>) {
        info!(tab = %self.state.tab_id, "player session terminated");
        self.object.unpublish();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

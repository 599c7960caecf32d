//! JSON message types carried inside frames.
//!
//! # Message flow
//!
//! ```text
//! Browser → Bridge:  frame payload  →  InboundMessage   (state events)
//! Bridge  → Browser: Command        →  frame payload    (transport commands, queries)
//! ```
//!
//! # Inbound shape
//!
//! ```json
//! {"type":"update","tabId":17,"data":{"title":"Song","position":42000000}}
//! {"type":"quit","tabId":17}
//! ```
//!
//! `type` is one of `change`, `update`, `quit`.  Other values still decode
//! (as [`MessageKind::Unknown`]) so the caller can ignore them without
//! treating the frame as malformed.
//!
//! # Outbound shape
//!
//! ```json
//! {"tabId":17,"cmd":"playPause"}
//! {"tabId":17,"cmd":"seek","data":5000000}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Errors raised while decoding a frame payload into a message.
///
/// A protocol error is fatal to the single message only; the channel keeps
/// running.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The payload is not valid JSON or does not have the expected shape.
    #[error("payload is not a valid message: {0}")]
    InvalidJson(String),
}

// ── Session identity ──────────────────────────────────────────────────────────

/// Opaque browser-side session identifier (the tab id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

/// Discriminant of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Playback state changed (new track, play/pause).
    Change,
    /// Periodic update (position, volume).
    Update,
    /// The tab stopped playing media or was closed.
    Quit,
    /// Any other value; ignored by the bridge.
    Unknown(String),
}

impl MessageKind {
    /// Returns the wire spelling.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Change => "change",
            Self::Update => "update",
            Self::Quit => "quit",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "change" => Self::Change,
            "update" => Self::Update,
            "quit" => Self::Quit,
            _ => Self::Unknown(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A state event sent by the browser extension for one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// What kind of event this is.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// The tab the event belongs to.
    #[serde(rename = "tabId")]
    pub tab_id: TabId,

    /// Domain keys and their new values.  Absent or `null` means "no keys".
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, JsonValue>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, JsonValue>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes a frame payload into an [`InboundMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] or [`ProtocolError::InvalidJson`];
/// the caller drops the message and keeps reading.
///
/// # Examples
///
/// ```rust
/// use mpris_bridge_core::protocol::messages::{decode_inbound, MessageKind, TabId};
///
/// let msg = decode_inbound(br#"{"type":"quit","tabId":3}"#).unwrap();
/// assert_eq!(msg.kind, MessageKind::Quit);
/// assert_eq!(msg.tab_id, TabId(3));
/// assert!(msg.data.is_empty());
/// ```
pub fn decode_inbound(payload: &[u8]) -> Result<InboundMessage, ProtocolError> {
    let text =
        std::str::from_utf8(payload).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// A command for the browser extension, addressed to one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// The tab the command is for.
    #[serde(rename = "tabId")]
    pub tab_id: TabId,

    /// Command name, e.g. `"playPause"` or `"getPosition"`.
    pub cmd: String,

    /// Optional argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl Command {
    /// Creates a command without an argument.
    pub fn new(tab_id: TabId, cmd: impl Into<String>) -> Self {
        Self {
            tab_id,
            cmd: cmd.into(),
            data: None,
        }
    }

    /// Creates a command carrying `data`.
    pub fn with_data(tab_id: TabId, cmd: impl Into<String>, data: JsonValue) -> Self {
        Self {
            tab_id,
            cmd: cmd.into(),
            data: Some(data),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_update_message() {
        // Arrange
        let payload = br#"{"type":"update","tabId":42,"data":{"position":42}}"#;

        // Act
        let msg = decode_inbound(payload).unwrap();

        // Assert
        assert_eq!(msg.kind, MessageKind::Update);
        assert_eq!(msg.tab_id, TabId(42));
        assert_eq!(msg.data.get("position"), Some(&json!(42)));
    }

    #[test]
    fn test_decode_quit_without_data_has_empty_map() {
        let msg = decode_inbound(br#"{"type":"quit","tabId":1}"#).unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_decode_null_data_has_empty_map() {
        let msg = decode_inbound(br#"{"type":"quit","tabId":1,"data":null}"#).unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let msg = decode_inbound(br#"{"type":"ping","tabId":9,"data":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown("ping".to_string()));
    }

    #[test]
    fn test_decode_invalid_json_returns_protocol_error() {
        let result = decode_inbound(b"{not json");
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_decode_invalid_utf8_returns_protocol_error() {
        let result = decode_inbound(&[0xFF, 0xFE, 0x7B]);
        assert!(matches!(result, Err(ProtocolError::InvalidUtf8(_))));
    }

    #[test]
    fn test_decode_missing_tab_id_returns_protocol_error() {
        let result = decode_inbound(br#"{"type":"change","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_command_without_data_omits_field() {
        // Arrange
        let cmd = Command::new(TabId(7), "playPause");

        // Act
        let text = serde_json::to_string(&cmd).unwrap();

        // Assert
        assert_eq!(text, r#"{"tabId":7,"cmd":"playPause"}"#);
    }

    #[test]
    fn test_command_with_data_serializes_camel_case_tab_id() {
        let cmd = Command::with_data(TabId(7), "seek", json!(-5000000));
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value, json!({"tabId": 7, "cmd": "seek", "data": -5000000}));
    }

    #[test]
    fn test_message_kind_wire_spelling() {
        assert_eq!(MessageKind::Change.as_str(), "change");
        assert_eq!(MessageKind::from("quit".to_string()), MessageKind::Quit);
    }
}

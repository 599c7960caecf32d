//! The browser's domain keys and the `Metadata` aggregate they feed.
//!
//! The extension reports track details under its own short keys.  Five of
//! them are folded into the MPRIS `Metadata` dictionary:
//!
//! | domain key  | metadata field   | bus type |
//! |-------------|------------------|----------|
//! | `songId`    | `mpris:trackid`  | `o`      |
//! | `url`       | `xesam:url`      | `s`      |
//! | `thumbnail` | `mpris:artUrl`   | `s`      |
//! | `title`     | `xesam:title`    | `s`      |
//! | `duration`  | `mpris:length`   | `x` (µs) |
//!
//! `position` and `seekedTo` are handled by the player itself; every other
//! key names an MPRIS property directly.

use std::collections::BTreeMap;

use mpris_bridge_core::track_id::track_path;
use mpris_bridge_core::{TypeTag, Value, ValueError};
use serde_json::Value as JsonValue;

/// A field of the `Metadata` dictionary fed by a domain key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    TrackId,
    Url,
    ArtUrl,
    Title,
    Length,
}

impl MetadataField {
    /// Key inside the `a{sv}` dictionary.
    pub fn key(self) -> &'static str {
        match self {
            Self::TrackId => "mpris:trackid",
            Self::Url => "xesam:url",
            Self::ArtUrl => "mpris:artUrl",
            Self::Title => "xesam:title",
            Self::Length => "mpris:length",
        }
    }

    fn type_tag(self) -> TypeTag {
        match self {
            Self::TrackId => TypeTag::ObjectPath,
            Self::Length => TypeTag::Int64,
            Self::Url | Self::ArtUrl | Self::Title => TypeTag::Str,
        }
    }
}

/// Classification of one key of an inbound event's `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKey<'a> {
    Metadata(MetadataField),
    /// Periodic position report; cached, never announced.
    Position,
    /// A seek finished; announced with the `Seeked` signal.
    SeekedTo,
    /// Any other key is an MPRIS property name.
    Property(&'a str),
}

impl<'a> DomainKey<'a> {
    pub fn classify(key: &'a str) -> Self {
        match key {
            "songId" => Self::Metadata(MetadataField::TrackId),
            "url" => Self::Metadata(MetadataField::Url),
            "thumbnail" => Self::Metadata(MetadataField::ArtUrl),
            "title" => Self::Metadata(MetadataField::Title),
            "duration" => Self::Metadata(MetadataField::Length),
            "position" => Self::Position,
            "seekedTo" => Self::SeekedTo,
            other => Self::Property(other),
        }
    }
}

/// The current track's metadata, already typed for the bus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: BTreeMap<&'static str, Value>,
}

impl Metadata {
    /// Applies one reported value.  `null` clears the field.
    ///
    /// Returns whether the stored metadata changed.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] if the value cannot be typed for the field; the
    /// stored metadata is left untouched.
    pub fn apply(&mut self, field: MetadataField, json: &JsonValue) -> Result<bool, ValueError> {
        if json.is_null() {
            return Ok(self.fields.remove(field.key()).is_some());
        }

        let value = match field {
            MetadataField::TrackId => {
                let id = match json {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => n.to_string(),
                    _ => {
                        return Err(ValueError::TypeMismatch {
                            expected: "track id".to_string(),
                            found: json.to_string(),
                        })
                    }
                };
                Value::ObjectPath(track_path(&id))
            }
            other => Value::from_json(json, &other.type_tag())?,
        };

        let previous = self.fields.insert(field.key(), value.clone());
        Ok(previous.as_ref() != Some(&value))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Object path of the current track, if one is known.
    pub fn track_path(&self) -> Option<&str> {
        self.get(MetadataField::TrackId.key()).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Renders the aggregate as the `a{sv}` value of the `Metadata` property.
    pub fn to_value(&self) -> Value {
        Value::Dict {
            key: TypeTag::Str,
            value: TypeTag::Variant,
            entries: self
                .fields
                .iter()
                .map(|(key, value)| (Value::string(*key), value.clone().into_variant()))
                .collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

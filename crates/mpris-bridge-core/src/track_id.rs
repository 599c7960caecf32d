//! Reversible mapping between browser-side track ids and object paths.
//!
//! Object-path elements may only contain `[A-Za-z0-9_]`, while a browser
//! track id is an arbitrary string (`"dQw4w9WgXcQ"`, `"a.b-c~d"`,
//! `"名前"`).  The encoding:
//!
//! 1. percent-escape every byte outside the URI unreserved set,
//! 2. additionally escape the unreserved punctuation `.` `-` `~` `_`,
//! 3. replace every `%` with `_`.
//!
//! ```text
//! "a.b_c"  →  "a%2Eb%5Fc"  →  "a_2Eb_5Fc"
//! ```
//!
//! Because `_` itself is escaped in step 2, every `_` in the output marks an
//! escape, and decoding is `_` → `%` followed by percent-decoding.

use thiserror::Error;

/// Reserved track path meaning "no current track".
pub const NO_TRACK: &str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

/// Prefix of every track path issued by the bridge.
pub const TRACK_PREFIX: &str = "/org/mpris/MediaPlayer2/Track/";

#[derive(Debug, Error, PartialEq)]
pub enum TrackIdError {
    /// The decoded bytes are not UTF-8.
    #[error("track id {0:?} does not decode to UTF-8")]
    InvalidEncoding(String),

    /// The path was not issued by [`track_path`].
    #[error("object path {0:?} is not a track path")]
    ForeignPath(String),
}

/// Encodes `id` into a legal object-path element.
pub fn encode_path_id(id: &str) -> String {
    let escaped = urlencoding::encode(id);
    let mut out = String::with_capacity(escaped.len());
    for c in escaped.chars() {
        match c {
            '.' => out.push_str("_2E"),
            '-' => out.push_str("_2D"),
            '~' => out.push_str("_7E"),
            '_' => out.push_str("_5F"),
            '%' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`encode_path_id`].
///
/// # Errors
///
/// Returns [`TrackIdError::InvalidEncoding`] if the escapes decode to bytes
/// that are not valid UTF-8.
pub fn decode_path_id(encoded: &str) -> Result<String, TrackIdError> {
    let percent = encoded.replace('_', "%");
    urlencoding::decode(&percent)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| TrackIdError::InvalidEncoding(encoded.to_string()))
}

/// Object path of the track `id`.  An empty id has no track.
pub fn track_path(id: &str) -> String {
    if id.is_empty() {
        return NO_TRACK.to_string();
    }
    format!("{TRACK_PREFIX}{}", encode_path_id(id))
}

/// Recovers the track id from a path built by [`track_path`].
///
/// # Errors
///
/// Returns [`TrackIdError::ForeignPath`] for any path outside
/// [`TRACK_PREFIX`], including [`NO_TRACK`]; callers check for the sentinel
/// first.
pub fn track_id_from_path(path: &str) -> Result<String, TrackIdError> {
    let encoded = path
        .strip_prefix(TRACK_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .ok_or_else(|| TrackIdError::ForeignPath(path.to_string()))?;
    decode_path_id(encoded)
}

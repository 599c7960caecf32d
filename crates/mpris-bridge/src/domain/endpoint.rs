//! Endpoint (well-known bus name) assignment for concurrent sessions.

use mpris_bridge_core::TabId;

/// Returns the bus name for a new session.
///
/// The first live session takes `base`; while any other session is live, a
/// new one takes `"{base}.instance{tab}"`.  Bus name elements may not contain
/// `-`, so a negative tab id is written with `_`.
///
/// # Examples
///
/// ```rust
/// use mpris_bridge::domain::endpoint_name;
/// use mpris_bridge_core::TabId;
///
/// assert_eq!(endpoint_name("org.mpris.MediaPlayer2.tab", TabId(7), 0), "org.mpris.MediaPlayer2.tab");
/// assert_eq!(endpoint_name("org.mpris.MediaPlayer2.tab", TabId(7), 1), "org.mpris.MediaPlayer2.tab.instance7");
/// ```
pub fn endpoint_name(base: &str, tab: TabId, live_sessions: usize) -> String {
    if live_sessions == 0 {
        return base.to_string();
    }
    format!("{base}.instance{}", tab.0.to_string().replace('-', "_"))
}

//! The MPRIS 2.2 interfaces exported for every player, plus the two standard
//! bus interfaces every object carries.

pub const ROOT_INTERFACE: &str = "org.mpris.MediaPlayer2";
pub const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// Object path every player is exported at.
pub const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";

/// Well-known name prefix desktop clients scan for.
pub const BUS_NAME_PREFIX: &str = "org.mpris.MediaPlayer2";

pub const MPRIS_SCHEMA: &str = r#"<!DOCTYPE node PUBLIC "-//freedesktop//DTD D-BUS Object Introspection 1.0//EN"
 "http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd">
<node>
  <interface name="org.freedesktop.DBus.Introspectable">
    <method name="Introspect">
      <arg name="data" type="s" direction="out"/>
    </method>
  </interface>
  <interface name="org.freedesktop.DBus.Properties">
    <method name="Get">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="out"/>
    </method>
    <method name="GetAll">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="properties" type="a{sv}" direction="out"/>
    </method>
    <method name="Set">
      <arg name="interface_name" type="s" direction="in"/>
      <arg name="property_name" type="s" direction="in"/>
      <arg name="value" type="v" direction="in"/>
    </method>
    <signal name="PropertiesChanged">
      <arg name="interface_name" type="s"/>
      <arg name="changed_properties" type="a{sv}"/>
      <arg name="invalidated_properties" type="as"/>
    </signal>
  </interface>
  <interface name="org.mpris.MediaPlayer2">
    <method name="Raise"/>
    <method name="Quit"/>
    <property name="CanQuit" type="b" access="read"/>
    <property name="Fullscreen" type="b" access="readwrite"/>
    <property name="CanSetFullscreen" type="b" access="read"/>
    <property name="CanRaise" type="b" access="read"/>
    <property name="HasTrackList" type="b" access="read"/>
    <property name="Identity" type="s" access="read"/>
    <property name="DesktopEntry" type="s" access="read"/>
    <property name="SupportedUriSchemes" type="as" access="read"/>
    <property name="SupportedMimeTypes" type="as" access="read"/>
  </interface>
  <interface name="org.mpris.MediaPlayer2.Player">
    <method name="Next"/>
    <method name="Previous"/>
    <method name="Pause"/>
    <method name="PlayPause"/>
    <method name="Stop"/>
    <method name="Play"/>
    <method name="Seek">
      <arg name="Offset" type="x" direction="in"/>
    </method>
    <method name="SetPosition">
      <arg name="TrackId" type="o" direction="in"/>
      <arg name="Position" type="x" direction="in"/>
    </method>
    <method name="OpenUri">
      <arg name="Uri" type="s" direction="in"/>
    </method>
    <signal name="Seeked">
      <arg name="Position" type="x"/>
    </signal>
    <property name="PlaybackStatus" type="s" access="read"/>
    <property name="LoopStatus" type="s" access="readwrite"/>
    <property name="Rate" type="d" access="readwrite"/>
    <property name="Shuffle" type="b" access="readwrite"/>
    <property name="Metadata" type="a{sv}" access="read"/>
    <property name="Volume" type="d" access="readwrite"/>
    <property name="Position" type="x" access="read">
      <annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="false"/>
    </property>
    <property name="MinimumRate" type="d" access="read"/>
    <property name="MaximumRate" type="d" access="read"/>
    <property name="CanGoNext" type="b" access="read"/>
    <property name="CanGoPrevious" type="b" access="read"/>
    <property name="CanPlay" type="b" access="read"/>
    <property name="CanPause" type="b" access="read"/>
    <property name="CanSeek" type="b" access="read"/>
    <property name="CanControl" type="b" access="read">
      <annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="false"/>
    </property>
  </interface>
</node>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Access, EmitsChange, SchemaRegistry};

    #[test]
    fn test_schema_parses_all_four_interfaces() {
        let registry = SchemaRegistry::parse(MPRIS_SCHEMA).unwrap();
        for name in [
            ROOT_INTERFACE,
            PLAYER_INTERFACE,
            PROPERTIES_INTERFACE,
            INTROSPECTABLE_INTERFACE,
        ] {
            assert!(registry.interface(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn test_position_does_not_emit_change_signal() {
        let registry = SchemaRegistry::parse(MPRIS_SCHEMA).unwrap();
        let player = registry.interface(PLAYER_INTERFACE).unwrap();
        let position = player.property("Position").unwrap();
        assert_eq!(position.emits_change, EmitsChange::False);
        assert_eq!(position.access, Access::Read);
    }

    #[test]
    fn test_fullscreen_belongs_to_root_interface() {
        let registry = SchemaRegistry::parse(MPRIS_SCHEMA).unwrap();
        assert!(registry
            .interface(ROOT_INTERFACE)
            .unwrap()
            .property("Fullscreen")
            .is_some());
        assert!(registry
            .interface(PLAYER_INTERFACE)
            .unwrap()
            .property("Fullscreen")
            .is_none());
    }
}

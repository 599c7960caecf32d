//! Declarative interface descriptions and the registry built from them.
//!
//! An exported object is described, not hand-coded.  The description is the
//! desktop bus introspection XML:
//!
//! ```xml
//! <node>
//!   <interface name="org.mpris.MediaPlayer2.Player">
//!     <method name="Seek"><arg name="Offset" type="x" direction="in"/></method>
//!     <property name="Volume" type="d" access="readwrite"/>
//!     <signal name="Seeked"><arg name="Position" type="x"/></signal>
//!   </interface>
//! </node>
//! ```
//!
//! [`SchemaRegistry::parse`] turns that text into immutable descriptors once at
//! startup.  Every exported object shares the same `Arc<InterfaceDescriptor>`
//! values; nothing in this module mutates after parsing, so no locking is
//! needed.

pub mod mpris;
mod parser;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use quick_xml::escape::escape;
use thiserror::Error;

use crate::value::TypeTag;

/// Annotation controlling `PropertiesChanged` behaviour.
pub const EMITS_CHANGED_ANNOTATION: &str = "org.freedesktop.DBus.Property.EmitsChangedSignal";

/// Errors raised while parsing an interface description.  All of them are
/// fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    /// The text is not well-formed XML.
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// A required attribute is absent.
    #[error("<{element}> is missing the `{attribute}` attribute")]
    MissingAttribute { element: String, attribute: String },

    /// A `type` attribute is not a valid signature.
    #[error("<{element} name=\"{name}\"> has invalid type {signature:?}")]
    InvalidType {
        element: String,
        name: String,
        signature: String,
    },

    /// A property `access` attribute is not `read`, `write` or `readwrite`.
    #[error("property {property:?} has invalid access {access:?}")]
    InvalidAccess { property: String, access: String },

    /// An annotation carries a value outside its vocabulary.
    #[error("annotation {name:?} has invalid value {value:?}")]
    InvalidAnnotation { name: String, value: String },

    /// A known element appears in the wrong place.
    #[error("<{element}> is not allowed inside <{parent}>")]
    UnexpectedElement { element: String, parent: String },

    /// Two interfaces share a name.
    #[error("interface {0:?} is declared twice")]
    DuplicateInterface(String),

    /// Two members of one interface share a name.
    #[error("member {member:?} is declared twice in {interface:?}")]
    DuplicateMember { interface: String, member: String },
}

// ── Descriptors ───────────────────────────────────────────────────────────────

/// Read/write capability of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "readwrite" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }
}

/// Value of the `EmitsChangedSignal` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitsChange {
    /// Changes are announced with the new value (the default).
    #[default]
    True,
    /// Changes are announced by name only.
    Invalidates,
    /// The property never changes.
    Const,
    /// Changes are not announced.
    False,
}

impl EmitsChange {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "true" => Some(Self::True),
            "invalidates" => Some(Self::Invalidates),
            "const" => Some(Self::Const),
            "false" => Some(Self::False),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::Invalidates => "invalidates",
            Self::Const => "const",
            Self::False => "false",
        }
    }
}

/// A method or signal argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDescriptor {
    pub name: Option<String>,
    pub type_tag: TypeTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub in_args: Vec<ArgDescriptor>,
    pub out_args: Vec<ArgDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub type_tag: TypeTag,
    pub access: Access,
    pub emits_change: EmitsChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub name: String,
    pub args: Vec<ArgDescriptor>,
}

/// One parsed interface: its methods, properties and signals in declaration
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
    pub properties: Vec<PropertyDescriptor>,
    pub signals: Vec<SignalDescriptor>,
}

impl InterfaceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Renders this interface as an introspection `<interface>` element.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "  <interface name=\"{}\">", escape(self.name.as_str()));
        for method in &self.methods {
            let _ = writeln!(out, "    <method name=\"{}\">", escape(method.name.as_str()));
            for arg in &method.in_args {
                write_arg(&mut out, arg, Some("in"));
            }
            for arg in &method.out_args {
                write_arg(&mut out, arg, Some("out"));
            }
            out.push_str("    </method>\n");
        }
        for property in &self.properties {
            let _ = write!(
                out,
                "    <property name=\"{}\" type=\"{}\" access=\"{}\"",
                escape(property.name.as_str()),
                property.type_tag,
                property.access.as_str()
            );
            if property.emits_change == EmitsChange::True {
                out.push_str("/>\n");
            } else {
                let _ = writeln!(
                    out,
                    ">\n      <annotation name=\"{EMITS_CHANGED_ANNOTATION}\" value=\"{}\"/>\n    </property>",
                    property.emits_change.as_str()
                );
            }
        }
        for signal in &self.signals {
            let _ = writeln!(out, "    <signal name=\"{}\">", escape(signal.name.as_str()));
            for arg in &signal.args {
                write_arg(&mut out, arg, None);
            }
            out.push_str("    </signal>\n");
        }
        out.push_str("  </interface>\n");
        out
    }
}

fn write_arg(out: &mut String, arg: &ArgDescriptor, direction: Option<&str>) {
    out.push_str("      <arg");
    if let Some(name) = &arg.name {
        let _ = write!(out, " name=\"{}\"", escape(name.as_str()));
    }
    let _ = write!(out, " type=\"{}\"", arg.type_tag);
    if let Some(direction) = direction {
        let _ = write!(out, " direction=\"{direction}\"");
    }
    out.push_str("/>\n");
}

/// Renders a complete introspection document for one object.
pub fn introspection_xml<'a>(interfaces: impl IntoIterator<Item = &'a InterfaceDescriptor>) -> String {
    let mut out = String::from(
        "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
         \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n<node>\n",
    );
    for interface in interfaces {
        out.push_str(&interface.to_xml());
    }
    out.push_str("</node>\n");
    out
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Immutable mapping from interface name to its descriptor.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    interfaces: BTreeMap<String, Arc<InterfaceDescriptor>>,
}

impl SchemaRegistry {
    /// Parses introspection XML into a registry.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the XML is malformed, a required attribute
    /// is missing, a type signature or access mode is invalid, or an
    /// interface is declared twice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mpris_bridge_core::schema::SchemaRegistry;
    ///
    /// let registry = SchemaRegistry::parse(
    ///     r#"<node><interface name="a.B"><method name="Ping"/></interface></node>"#,
    /// ).unwrap();
    /// assert!(registry.interface("a.B").unwrap().method("Ping").is_some());
    /// ```
    pub fn parse(xml: &str) -> Result<Self, SchemaError> {
        let mut interfaces = BTreeMap::new();
        for descriptor in parser::parse_interfaces(xml)? {
            if interfaces.contains_key(&descriptor.name) {
                return Err(SchemaError::DuplicateInterface(descriptor.name));
            }
            interfaces.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        Ok(Self { interfaces })
    }

    /// Returns the shared descriptor for `name`.
    pub fn interface(&self, name: &str) -> Option<Arc<InterfaceDescriptor>> {
        self.interfaces.get(name).cloned()
    }

    /// Interface names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Event-driven introspection XML parser.
//!
//! Walks the `quick-xml` event stream with an explicit element stack.  Known
//! elements in the right place build descriptors; unknown elements (`<doc>`,
//! nested child `<node>`s, vendor extensions) are skipped together with their
//! content.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{
    Access, ArgDescriptor, EmitsChange, InterfaceDescriptor, MethodDescriptor, PropertyDescriptor,
    SchemaError, SignalDescriptor, EMITS_CHANGED_ANNOTATION,
};
use crate::value::TypeTag;

/// One open element.
enum Open {
    Node,
    Interface {
        descriptor: InterfaceDescriptor,
        /// Interface-level `EmitsChangedSignal` default.
        emits_default: Option<EmitsChange>,
        /// Per-property annotation, parallel to `descriptor.properties`.
        emits_explicit: Vec<Option<EmitsChange>>,
    },
    Method(MethodDescriptor),
    Property {
        descriptor: PropertyDescriptor,
        emits: Option<EmitsChange>,
    },
    Signal(SignalDescriptor),
    /// A leaf that carries no children of interest (`<arg>`, `<annotation>`).
    Leaf(&'static str),
}

impl Open {
    fn tag(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Interface { .. } => "interface",
            Self::Method(_) => "method",
            Self::Property { .. } => "property",
            Self::Signal(_) => "signal",
            Self::Leaf(tag) => tag,
        }
    }
}

struct Parser {
    stack: Vec<Open>,
    /// Depth inside a skipped subtree; 0 when not skipping.
    skipping: usize,
    done: Vec<InterfaceDescriptor>,
}

pub(super) fn parse_interfaces(xml: &str) -> Result<Vec<InterfaceDescriptor>, SchemaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = Parser {
        stack: Vec::new(),
        skipping: 0,
        done: Vec::new(),
    };

    loop {
        let event = reader.read_event().map_err(|e| SchemaError::Xml {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;
        match event {
            Event::Start(e) => parser.open(&e)?,
            Event::Empty(e) => {
                parser.open(&e)?;
                parser.close()?;
            }
            Event::End(_) => parser.close()?,
            Event::Eof => break,
            // Text, comments, declarations, DOCTYPE.
            _ => {}
        }
    }

    if !parser.stack.is_empty() || parser.skipping > 0 {
        return Err(SchemaError::Xml {
            position: reader.buffer_position() as u64,
            message: "unexpected end of document".to_string(),
        });
    }
    Ok(parser.done)
}

impl Parser {
    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), SchemaError> {
        if self.skipping > 0 {
            self.skipping += 1;
            return Ok(());
        }

        let element = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let parent = self.stack.last().map(Open::tag);

        let next = match (element.as_str(), parent) {
            ("node", None) => Open::Node,
            ("interface", Some("node")) => Open::Interface {
                descriptor: InterfaceDescriptor {
                    name: required(e, "interface", "name")?,
                    methods: Vec::new(),
                    properties: Vec::new(),
                    signals: Vec::new(),
                },
                emits_default: None,
                emits_explicit: Vec::new(),
            },
            ("method", Some("interface")) => Open::Method(MethodDescriptor {
                name: required(e, "method", "name")?,
                in_args: Vec::new(),
                out_args: Vec::new(),
            }),
            ("signal", Some("interface")) => Open::Signal(SignalDescriptor {
                name: required(e, "signal", "name")?,
                args: Vec::new(),
            }),
            ("property", Some("interface")) => {
                let name = required(e, "property", "name")?;
                let type_tag = signature(e, "property", &name)?;
                let access_text = required(e, "property", "access")?;
                let access = Access::parse(&access_text).ok_or_else(|| {
                    SchemaError::InvalidAccess {
                        property: name.clone(),
                        access: access_text,
                    }
                })?;
                Open::Property {
                    descriptor: PropertyDescriptor {
                        name,
                        type_tag,
                        access,
                        emits_change: EmitsChange::True,
                    },
                    emits: None,
                }
            }
            ("arg", Some("method" | "signal")) => {
                self.arg(e)?;
                Open::Leaf("arg")
            }
            ("annotation", Some(_)) => {
                self.annotation(e)?;
                Open::Leaf("annotation")
            }
            ("node", Some("node")) => {
                // Child object; not part of this object's interfaces.
                self.skipping = 1;
                return Ok(());
            }
            ("node" | "interface" | "method" | "signal" | "property" | "arg", parent) => {
                return Err(SchemaError::UnexpectedElement {
                    element,
                    parent: parent.unwrap_or("document").to_string(),
                });
            }
            _ => {
                self.skipping = 1;
                return Ok(());
            }
        };
        self.stack.push(next);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SchemaError> {
        if self.skipping > 0 {
            self.skipping -= 1;
            return Ok(());
        }

        let Some(closed) = self.stack.pop() else {
            return Ok(());
        };

        match (closed, self.stack.last_mut()) {
            (
                Open::Interface {
                    mut descriptor,
                    emits_default,
                    emits_explicit,
                },
                _,
            ) => {
                let default = emits_default.unwrap_or_default();
                for (property, explicit) in descriptor.properties.iter_mut().zip(emits_explicit) {
                    property.emits_change = explicit.unwrap_or(default);
                }
                self.done.push(descriptor);
            }
            (Open::Method(method), Some(Open::Interface { descriptor, .. })) => {
                ensure_unique(descriptor, &method.name)?;
                descriptor.methods.push(method);
            }
            (Open::Signal(signal), Some(Open::Interface { descriptor, .. })) => {
                ensure_unique(descriptor, &signal.name)?;
                descriptor.signals.push(signal);
            }
            (
                Open::Property {
                    descriptor: property,
                    emits,
                },
                Some(Open::Interface {
                    descriptor,
                    emits_explicit,
                    ..
                }),
            ) => {
                ensure_unique(descriptor, &property.name)?;
                descriptor.properties.push(property);
                emits_explicit.push(emits);
            }
            _ => {}
        }
        Ok(())
    }

    fn arg(&mut self, e: &BytesStart<'_>) -> Result<(), SchemaError> {
        let name = optional(e, "name")?;
        let direction = optional(e, "direction")?;
        let (element, owner) = match self.stack.last() {
            Some(Open::Method(m)) => ("method", m.name.clone()),
            Some(Open::Signal(s)) => ("signal", s.name.clone()),
            _ => ("arg", String::new()),
        };
        let arg = ArgDescriptor {
            type_tag: signature(e, element, &owner)?,
            name,
        };

        match self.stack.last_mut() {
            Some(Open::Method(method)) => match direction.as_deref() {
                None | Some("in") => method.in_args.push(arg),
                Some("out") => method.out_args.push(arg),
                Some(_) => {
                    return Err(SchemaError::MissingAttribute {
                        element: "arg".to_string(),
                        attribute: "direction (in|out)".to_string(),
                    })
                }
            },
            Some(Open::Signal(signal)) => signal.args.push(arg),
            _ => {}
        }
        Ok(())
    }

    fn annotation(&mut self, e: &BytesStart<'_>) -> Result<(), SchemaError> {
        let name = required(e, "annotation", "name")?;
        if name != EMITS_CHANGED_ANNOTATION {
            return Ok(());
        }
        let value = required(e, "annotation", "value")?;
        let parsed = EmitsChange::parse(&value)
            .ok_or_else(|| SchemaError::InvalidAnnotation { name, value })?;

        match self.stack.last_mut() {
            Some(Open::Property { emits, .. }) => *emits = Some(parsed),
            Some(Open::Interface { emits_default, .. }) => *emits_default = Some(parsed),
            _ => {}
        }
        Ok(())
    }
}

fn ensure_unique(interface: &InterfaceDescriptor, member: &str) -> Result<(), SchemaError> {
    let taken = interface.method(member).is_some()
        || interface.property(member).is_some()
        || interface.signal(member).is_some();
    if taken {
        return Err(SchemaError::DuplicateMember {
            interface: interface.name.clone(),
            member: member.to_string(),
        });
    }
    Ok(())
}

fn optional(e: &BytesStart<'_>, attribute: &str) -> Result<Option<String>, SchemaError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SchemaError::Xml {
            position: 0,
            message: err.to_string(),
        })?;
        if attr.key.as_ref() == attribute.as_bytes() {
            let value = attr.unescape_value().map_err(|err| SchemaError::Xml {
                position: 0,
                message: err.to_string(),
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required(e: &BytesStart<'_>, element: &str, attribute: &str) -> Result<String, SchemaError> {
    optional(e, attribute)?.ok_or_else(|| SchemaError::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    })
}

fn signature(e: &BytesStart<'_>, element: &str, name: &str) -> Result<TypeTag, SchemaError> {
    let text = required(e, element, "type")?;
    TypeTag::parse(&text).map_err(|_| SchemaError::InvalidType {
        element: element.to_string(),
        name: name.to_string(),
        signature: text,
    })
}

//! Schema-driven object exporter.
//!
//! An [`ExportedObject`] turns interface descriptors from the
//! [`SchemaRegistry`] into a live remote object: it validates incoming calls
//! against the schema, routes them through the target's [`DispatchTable`],
//! types the results per the declared signatures and sends the replies.  It
//! also implements the two sub-protocols every object carries:
//!
//! - `org.freedesktop.DBus.Properties`: `Get`, `GetAll`, `Set`, and the
//!   `PropertiesChanged` signal;
//! - `org.freedesktop.DBus.Introspectable`: `Introspect`.
//!
//! # Dispatch tables
//!
//! A target type lists its members once, in a table built on first use:
//!
//! ```text
//! (interface, member)   → fn(&mut T, &[Value]) -> Result<Vec<PropertyValue>, HandlerError>
//! (interface, property) → PropertyBinding { getter, setter }
//! ```
//!
//! Nothing is looked up on the target by name at run time; a schema member
//! without a table entry answers `UnknownMethod` / `NotSupported`.
//!
//! # Deferred reads
//!
//! A getter may answer [`Readout::Remote`]: the value lives in the browser.
//! `Get` then parks a reply continuation in the object's
//! [`AsyncPropertyResolver`], asks the target to query the browser, and sends
//! nothing yet.  The reply goes out when the player feeds the answer to
//! [`ExportedObject::resolve`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mpris_bridge_core::schema::introspection_xml;
use mpris_bridge_core::schema::mpris::{INTROSPECTABLE_INTERFACE, PROPERTIES_INTERFACE};
use mpris_bridge_core::{
    EmitsChange, InterfaceDescriptor, MethodDescriptor, PropertyDescriptor, SchemaRegistry,
    TypeTag, Value, ValueError,
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::resolver::{AsyncPropertyResolver, ReadCallback, ReadOutcome};
use crate::domain::PendingReadPolicy;
use crate::infrastructure::bus::{
    BusConnection, BusError, BusProvider, CallOutcome, MethodCall, RemoteError, Signal,
};

/// Standard error names of the desktop bus.
pub mod error_names {
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
}

/// Namespace for handler error kinds that carry no namespace of their own.
pub const HANDLER_ERROR_NAMESPACE: &str = "org.mpris.MediaPlayer2.Error";

// ── Errors ────────────────────────────────────────────────────────────────────

/// A failure raised by a method or property handler.
///
/// Converted to a [`RemoteError`] whose name is the variant name (or the
/// custom kind), namespaced under [`HANDLER_ERROR_NAMESPACE`] unless it
/// already contains a `.`.  It never escapes the event loop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("{0}")]
    InvalidArgs(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    InvalidTrackId(String),
    #[error("{0}")]
    Failed(String),
    #[error("{message}")]
    Custom { kind: String, message: String },
}

impl HandlerError {
    /// Symbolic kind before namespacing.
    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidArgs(_) => "InvalidArgs",
            Self::NotSupported(_) => "NotSupported",
            Self::InvalidTrackId(_) => "InvalidTrackId",
            Self::Failed(_) => "Failed",
            Self::Custom { kind, .. } => kind,
        }
    }

    pub fn to_remote(&self) -> RemoteError {
        let kind = self.kind();
        let name = if kind.contains('.') {
            kind.to_string()
        } else {
            format!("{HANDLER_ERROR_NAMESPACE}.{kind}")
        };
        RemoteError::new(name, self.to_string())
    }
}

/// Errors raised by the exporter's own operations (registration, emission).
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("interface {0:?} is not in the schema")]
    UnknownInterface(String),

    #[error("property {property:?} is not declared in {interface:?}")]
    UnknownProperty { interface: String, property: String },

    #[error("signal {signal:?} is not declared in {interface:?}")]
    UnknownSignal { interface: String, signal: String },

    #[error("signal {signal:?} takes {expected} arguments, got {got}")]
    SignalArity {
        signal: String,
        expected: usize,
        got: usize,
    },

    #[error("{context}: {source}")]
    InvalidValue {
        context: String,
        #[source]
        source: ValueError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

// ── Values and readouts ───────────────────────────────────────────────────────

/// A handler result or property value before it is typed per the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Untyped JSON as reported by the browser.
    Json(JsonValue),
    /// Already typed; coerced if it does not match the declaration.
    Typed(Value),
}

impl PropertyValue {
    /// Types this value as `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] if no conversion to `tag` exists.
    pub fn typed_as(&self, tag: &TypeTag) -> Result<Value, ValueError> {
        match self {
            Self::Json(json) => Value::from_json(json, tag),
            Self::Typed(value) => coerce(value, tag),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Typed(value)
    }
}

impl From<JsonValue> for PropertyValue {
    fn from(json: JsonValue) -> Self {
        Self::Json(json)
    }
}

/// Converts `value` to the declared type, going through JSON when the types
/// differ (e.g. a client sends `Volume` as an `i`).
pub fn coerce(value: &Value, tag: &TypeTag) -> Result<Value, ValueError> {
    if value.conforms_to(tag) {
        return Ok(value.clone());
    }
    if *tag == TypeTag::Variant {
        return Ok(value.clone().into_variant());
    }
    let inner = value.unwrap_variant();
    if inner.conforms_to(tag) {
        return Ok(inner.clone());
    }
    let json = inner.to_json().ok_or_else(|| ValueError::TypeMismatch {
        expected: tag.to_string(),
        found: "a non-finite number".to_string(),
    })?;
    Value::from_json(&json, tag)
}

fn as_variant(value: Value) -> Value {
    match value {
        Value::Variant(_) => value,
        other => other.into_variant(),
    }
}

/// What a property getter knows.
#[derive(Debug, Clone, PartialEq)]
pub enum Readout {
    /// The current value.
    Ready(PropertyValue),
    /// The value lives remotely; `Get` defers.  Carries the last cached value,
    /// which `GetAll` reports instead of waiting.
    Remote(PropertyValue),
}

// ── Dispatch table ────────────────────────────────────────────────────────────

pub type MethodHandler<T> = fn(&mut T, &[Value]) -> Result<Vec<PropertyValue>, HandlerError>;
pub type PropertyGetter<T> = fn(&T, &str) -> Readout;
pub type PropertySetter<T> = fn(&mut T, &str, &Value) -> Result<(), HandlerError>;

/// Typed accessors bound to one declared property.
pub struct PropertyBinding<T> {
    pub getter: Option<PropertyGetter<T>>,
    pub setter: Option<PropertySetter<T>>,
}

/// Immutable member table of one target type.
pub struct DispatchTable<T> {
    methods: HashMap<&'static str, HashMap<&'static str, MethodHandler<T>>>,
    properties: HashMap<&'static str, HashMap<&'static str, PropertyBinding<T>>>,
}

impl<T> Default for DispatchTable<T> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
            properties: HashMap::new(),
        }
    }
}

impl<T> DispatchTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(
        mut self,
        interface: &'static str,
        member: &'static str,
        handler: MethodHandler<T>,
    ) -> Self {
        self.methods
            .entry(interface)
            .or_default()
            .insert(member, handler);
        self
    }

    pub fn read_only(
        self,
        interface: &'static str,
        property: &'static str,
        getter: PropertyGetter<T>,
    ) -> Self {
        self.bind(interface, property, Some(getter), None)
    }

    pub fn read_write(
        self,
        interface: &'static str,
        property: &'static str,
        getter: PropertyGetter<T>,
        setter: PropertySetter<T>,
    ) -> Self {
        self.bind(interface, property, Some(getter), Some(setter))
    }

    fn bind(
        mut self,
        interface: &'static str,
        property: &'static str,
        getter: Option<PropertyGetter<T>>,
        setter: Option<PropertySetter<T>>,
    ) -> Self {
        self.properties
            .entry(interface)
            .or_default()
            .insert(property, PropertyBinding { getter, setter });
        self
    }

    pub fn handler(&self, interface: &str, member: &str) -> Option<MethodHandler<T>> {
        self.methods.get(interface)?.get(member).copied()
    }

    pub fn binding(&self, interface: &str, property: &str) -> Option<&PropertyBinding<T>> {
        self.properties.get(interface)?.get(property)
    }
}

/// A type whose members are exported through an [`ExportedObject`].
pub trait DispatchTarget: Sized + 'static {
    /// The member table, built once.
    fn dispatch_table() -> &'static DispatchTable<Self>;

    /// Asks the remote side for the current value of `property`.  The answer
    /// is fed to [`ExportedObject::resolve`] when it arrives.
    fn query_remote(&mut self, property: &str);
}

// ── Exported object ───────────────────────────────────────────────────────────

fn error(name: &str, message: impl Into<String>) -> CallOutcome {
    CallOutcome::Error(RemoteError::new(name, message))
}

/// One object published on the bus at `(endpoint, path)`.
pub struct ExportedObject<C: BusConnection> {
    connection: C,
    path: String,
    interfaces: Vec<Arc<InterfaceDescriptor>>,
    resolver: AsyncPropertyResolver,
}

impl<C: BusConnection + 'static> ExportedObject<C> {
    /// Claims `endpoint` on a fresh connection and publishes `interfaces`
    /// (plus Properties and Introspectable) at `path`.
    ///
    /// # Errors
    ///
    /// - [`ExportError::UnknownInterface`] if a name is missing from `schema`;
    ///   nothing is claimed in that case.
    /// - [`ExportError::Bus`] with [`BusError::NameInUse`] if the endpoint is
    ///   owned elsewhere.
    pub fn register<P>(
        provider: &P,
        endpoint: &str,
        path: &str,
        schema: &SchemaRegistry,
        interfaces: &[&str],
        policy: PendingReadPolicy,
    ) -> Result<Self, ExportError>
    where
        P: BusProvider<Connection = C>,
    {
        let mut resolved: Vec<Arc<InterfaceDescriptor>> = Vec::new();
        let standard = [PROPERTIES_INTERFACE, INTROSPECTABLE_INTERFACE];
        for name in interfaces.iter().copied().chain(standard) {
            if resolved.iter().any(|i| i.name == name) {
                continue;
            }
            let descriptor = schema
                .interface(name)
                .ok_or_else(|| ExportError::UnknownInterface(name.to_string()))?;
            resolved.push(descriptor);
        }

        let connection = provider.connect(endpoint)?;
        info!("exported {path} on {endpoint}");
        Ok(Self {
            connection,
            path: path.to_string(),
            interfaces: resolved,
            resolver: AsyncPropertyResolver::new(policy),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.connection.endpoint()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns a registered interface.
    pub fn interface(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces
            .iter()
            .find(|i| i.name == name)
            .map(Arc::as_ref)
    }

    fn find(&self, name: &str) -> Option<Arc<InterfaceDescriptor>> {
        self.interfaces.iter().find(|i| i.name == name).cloned()
    }

    /// Name of the first registered interface declaring `property`.
    pub fn owner_of(&self, property: &str) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|i| i.property(property).is_some())
            .map(|i| i.name.as_str())
    }

    /// Names of the registered interfaces in registration order.
    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.iter().map(|i| i.name.as_str())
    }

    /// Introspection XML for every registered interface.
    pub fn introspect(&self) -> String {
        introspection_xml(self.interfaces.iter().map(Arc::as_ref))
    }

    // ── Incoming calls ────────────────────────────────────────────────────────

    /// Handles one incoming call and replies, unless the reply is deferred.
    pub fn dispatch<T: DispatchTarget>(&mut self, target: &mut T, call: MethodCall) {
        let serial = call.serial;
        debug!(
            endpoint = %self.endpoint(),
            "call {}.{} {:?}",
            call.interface,
            call.member,
            call.args
        );
        if let Some(outcome) = self.handle(target, &call) {
            self.send_reply(serial, outcome);
        }
    }

    fn handle<T: DispatchTarget>(&mut self, target: &mut T, call: &MethodCall) -> Option<CallOutcome> {
        if call.path != self.path {
            return Some(error(
                error_names::UNKNOWN_OBJECT,
                format!("no object at {}", call.path),
            ));
        }
        let Some(iface) = self.find(&call.interface) else {
            return Some(error(
                error_names::UNKNOWN_INTERFACE,
                format!("no interface {} at {}", call.interface, self.path),
            ));
        };
        let Some(method) = iface.method(&call.member) else {
            return Some(error(
                error_names::UNKNOWN_METHOD,
                format!("no method {}.{}", call.interface, call.member),
            ));
        };
        if let Err(message) = check_args(&iface.name, method, &call.args) {
            return Some(error(error_names::INVALID_ARGS, message));
        }

        let arg_str = |i: usize| call.args.get(i).and_then(Value::as_str).unwrap_or("");
        match (iface.name.as_str(), method.name.as_str()) {
            (PROPERTIES_INTERFACE, "Get") => {
                self.get_property(target, call.serial, arg_str(0), arg_str(1))
            }
            (PROPERTIES_INTERFACE, "GetAll") => Some(self.get_all(target, arg_str(0))),
            (PROPERTIES_INTERFACE, "Set") => match call.args.get(2) {
                Some(value) => Some(self.set_property(target, arg_str(0), arg_str(1), value)),
                None => Some(error(error_names::INVALID_ARGS, "Set needs a value")),
            },
            (INTROSPECTABLE_INTERFACE, "Introspect") => {
                Some(CallOutcome::Return(vec![Value::Str(self.introspect())]))
            }
            _ => Some(invoke(target, &iface.name, method, &call.args)),
        }
    }

    fn lookup_property(
        &self,
        interface: &str,
        property: &str,
    ) -> Result<PropertyDescriptor, CallOutcome> {
        let iface = self.interface(interface).ok_or_else(|| {
            error(
                error_names::UNKNOWN_INTERFACE,
                format!("no interface {interface} at {}", self.path),
            )
        })?;
        iface.property(property).cloned().ok_or_else(|| {
            error(
                error_names::UNKNOWN_PROPERTY,
                format!("no property {property} in {interface}"),
            )
        })
    }

    /// `Properties.Get`.  Returns `None` when the reply is deferred.
    pub fn get_property<T: DispatchTarget>(
        &mut self,
        target: &mut T,
        serial: u64,
        interface: &str,
        property: &str,
    ) -> Option<CallOutcome> {
        let descriptor = match self.lookup_property(interface, property) {
            Ok(descriptor) => descriptor,
            Err(outcome) => return Some(outcome),
        };
        if !descriptor.access.readable() {
            return Some(error(
                error_names::ACCESS_DENIED,
                format!("property {property} is write-only"),
            ));
        }
        let Some(getter) = T::dispatch_table()
            .binding(interface, property)
            .and_then(|b| b.getter)
        else {
            return Some(error(
                error_names::NOT_SUPPORTED,
                format!("property {property} cannot be read"),
            ));
        };

        match getter(target, property) {
            Readout::Ready(value) => Some(match value.typed_as(&descriptor.type_tag) {
                Ok(typed) => CallOutcome::Return(vec![as_variant(typed)]),
                Err(e) => error(error_names::FAILED, format!("{property}: {e}")),
            }),
            Readout::Remote(_) => {
                self.defer_read(target, serial, property, descriptor.type_tag);
                None
            }
        }
    }

    fn defer_read<T: DispatchTarget>(
        &mut self,
        target: &mut T,
        serial: u64,
        property: &str,
        type_tag: TypeTag,
    ) {
        let connection = self.connection.clone();
        let name = property.to_string();
        let callback: ReadCallback = Box::new(move |outcome| {
            let reply = match outcome {
                ReadOutcome::Resolved(json) => match Value::from_json(&json, &type_tag) {
                    Ok(value) => CallOutcome::Return(vec![as_variant(value)]),
                    Err(e) => error(
                        error_names::FAILED,
                        format!("browser reported an invalid {name}: {e}"),
                    ),
                },
                ReadOutcome::Superseded => error(
                    error_names::FAILED,
                    format!("read of {name} was superseded by a newer read"),
                ),
                ReadOutcome::TimedOut => error(
                    error_names::NO_REPLY,
                    format!("browser did not report {name} in time"),
                ),
                ReadOutcome::Cancelled => error(
                    error_names::FAILED,
                    format!("player went away before reporting {name}"),
                ),
            };
            if let Err(e) = connection.reply(serial, reply) {
                debug!("deferred reply to call {serial} not delivered: {e}");
            }
        });
        self.resolver
            .request(property, callback, || target.query_remote(property));
    }

    /// `Properties.GetAll`.  Remote-only properties report their cached value.
    pub fn get_all<T: DispatchTarget>(&self, target: &T, interface: &str) -> CallOutcome {
        let Some(iface) = self.interface(interface) else {
            return error(
                error_names::UNKNOWN_INTERFACE,
                format!("no interface {interface} at {}", self.path),
            );
        };
        let table = T::dispatch_table();
        let mut entries = Vec::new();
        for property in iface.properties.iter().filter(|p| p.access.readable()) {
            let Some(getter) = table
                .binding(&iface.name, &property.name)
                .and_then(|b| b.getter)
            else {
                continue;
            };
            let (Readout::Ready(value) | Readout::Remote(value)) = getter(target, &property.name);
            match value.typed_as(&property.type_tag) {
                Ok(typed) => entries.push((Value::string(&property.name), as_variant(typed))),
                Err(e) => warn!("GetAll skips {}: {e}", property.name),
            }
        }
        CallOutcome::Return(vec![Value::Dict {
            key: TypeTag::Str,
            value: TypeTag::Variant,
            entries,
        }])
    }

    /// `Properties.Set`.  Replies with empty success once the setter accepted
    /// the value, whether or not the change has taken effect yet.
    pub fn set_property<T: DispatchTarget>(
        &self,
        target: &mut T,
        interface: &str,
        property: &str,
        value: &Value,
    ) -> CallOutcome {
        let descriptor = match self.lookup_property(interface, property) {
            Ok(descriptor) => descriptor,
            Err(outcome) => return outcome,
        };
        let setter = T::dispatch_table()
            .binding(interface, property)
            .and_then(|b| b.setter);
        let (true, Some(setter)) = (descriptor.access.writable(), setter) else {
            return error(
                error_names::PROPERTY_READ_ONLY,
                format!("property {property} is read-only"),
            );
        };
        let typed = match coerce(value.unwrap_variant(), &descriptor.type_tag) {
            Ok(typed) => typed,
            Err(e) => {
                return error(
                    error_names::INVALID_ARGS,
                    format!("{property} expects {}: {e}", descriptor.type_tag),
                )
            }
        };
        match setter(target, property, &typed) {
            Ok(()) => CallOutcome::Return(Vec::new()),
            Err(e) => CallOutcome::Error(e.to_remote()),
        }
    }

    fn send_reply(&self, serial: u64, outcome: CallOutcome) {
        if let Err(e) = self.connection.reply(serial, outcome) {
            warn!("reply to call {serial} not delivered: {e}");
        }
    }

    // ── Outgoing notifications ────────────────────────────────────────────────

    /// Emits `PropertiesChanged` for `interface`.
    ///
    /// Each value is typed per its declaration.  Properties annotated
    /// `invalidates` are listed by name only; `const` and `false` ones are
    /// left out.  Returns whether a signal was emitted.
    ///
    /// # Errors
    ///
    /// [`ExportError::UnknownProperty`] for an undeclared name,
    /// [`ExportError::InvalidValue`] for a value that cannot be typed,
    /// [`ExportError::Bus`] if the connection is closed.
    pub fn emit_properties_changed(
        &self,
        interface: &str,
        changed: &[(&str, PropertyValue)],
        invalidated: &[&str],
    ) -> Result<bool, ExportError> {
        let iface = self
            .interface(interface)
            .ok_or_else(|| ExportError::UnknownInterface(interface.to_string()))?;
        let declared = |name: &str| {
            iface
                .property(name)
                .ok_or_else(|| ExportError::UnknownProperty {
                    interface: interface.to_string(),
                    property: name.to_string(),
                })
        };

        let mut entries = Vec::new();
        let mut names: Vec<Value> = Vec::new();
        for (name, value) in changed {
            let property = declared(name)?;
            match property.emits_change {
                EmitsChange::True => {
                    let typed = value.typed_as(&property.type_tag).map_err(|source| {
                        ExportError::InvalidValue {
                            context: format!("property {name}"),
                            source,
                        }
                    })?;
                    entries.push((Value::string(*name), as_variant(typed)));
                }
                EmitsChange::Invalidates => names.push(Value::string(*name)),
                EmitsChange::Const | EmitsChange::False => {}
            }
        }
        for name in invalidated {
            declared(name)?;
            names.push(Value::string(*name));
        }

        if entries.is_empty() && names.is_empty() {
            return Ok(false);
        }
        self.connection.emit(Signal {
            path: self.path.clone(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: "PropertiesChanged".to_string(),
            args: vec![
                Value::string(interface),
                Value::Dict {
                    key: TypeTag::Str,
                    value: TypeTag::Variant,
                    entries,
                },
                Value::Array {
                    elem: TypeTag::Str,
                    items: names,
                },
            ],
        })?;
        Ok(true)
    }

    /// Emits a declared signal, typing `args` per its descriptor.
    ///
    /// # Errors
    ///
    /// [`ExportError::UnknownSignal`], [`ExportError::SignalArity`],
    /// [`ExportError::InvalidValue`] or [`ExportError::Bus`].
    pub fn emit_signal(
        &self,
        interface: &str,
        member: &str,
        args: &[PropertyValue],
    ) -> Result<(), ExportError> {
        let signal = self
            .interface(interface)
            .and_then(|i| i.signal(member))
            .ok_or_else(|| ExportError::UnknownSignal {
                interface: interface.to_string(),
                signal: member.to_string(),
            })?;
        if signal.args.len() != args.len() {
            return Err(ExportError::SignalArity {
                signal: member.to_string(),
                expected: signal.args.len(),
                got: args.len(),
            });
        }
        let typed = args
            .iter()
            .zip(&signal.args)
            .map(|(value, arg)| {
                value
                    .typed_as(&arg.type_tag)
                    .map_err(|source| ExportError::InvalidValue {
                        context: format!("signal {member}"),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.connection.emit(Signal {
            path: self.path.clone(),
            interface: interface.to_string(),
            member: member.to_string(),
            args: typed,
        })?;
        Ok(())
    }

    // ── Deferred reads and lifecycle ──────────────────────────────────────────

    /// Completes reads parked on `property`.  Returns how many completed.
    pub fn resolve(&mut self, property: &str, value: &JsonValue) -> usize {
        self.resolver.resolve(property, value)
    }

    /// Fails reads parked longer than `timeout`.
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) -> usize {
        self.resolver.expire(now, timeout)
    }

    /// Fails every parked read, then releases the endpoint and closes the
    /// connection.
    pub fn unpublish(mut self) {
        let cancelled = self.resolver.cancel_all();
        if cancelled > 0 {
            debug!("cancelled {cancelled} pending reads on {}", self.endpoint());
        }
        self.connection.close();
        info!("unpublished {} on {}", self.path, self.connection.endpoint());
    }
}

/// Checks the call's argument types against the declared in-args.
fn check_args(interface: &str, method: &MethodDescriptor, args: &[Value]) -> Result<(), String> {
    let expected: String = method.in_args.iter().map(|a| a.type_tag.to_string()).collect();
    let got: String = args.iter().map(|a| a.type_tag().to_string()).collect();
    if expected == got {
        Ok(())
    } else {
        Err(format!(
            "{interface}.{} expects signature {expected:?}, got {got:?}",
            method.name
        ))
    }
}

fn invoke<T: DispatchTarget>(
    target: &mut T,
    interface: &str,
    method: &MethodDescriptor,
    args: &[Value],
) -> CallOutcome {
    let Some(handler) = T::dispatch_table().handler(interface, &method.name) else {
        return error(
            error_names::UNKNOWN_METHOD,
            format!("{interface}.{} is not implemented", method.name),
        );
    };
    let values = match handler(target, args) {
        Ok(values) => values,
        Err(e) => {
            debug!("{interface}.{} failed: {e}", method.name);
            return CallOutcome::Error(e.to_remote());
        }
    };
    if values.len() != method.out_args.len() {
        warn!(
            "{interface}.{} returned {} values, declared {}",
            method.name,
            values.len(),
            method.out_args.len()
        );
        return error(
            error_names::FAILED,
            format!("{} produced a malformed reply", method.name),
        );
    }
    let mut out = Vec::with_capacity(values.len());
    for (value, arg) in values.iter().zip(&method.out_args) {
        match value.typed_as(&arg.type_tag) {
            Ok(typed) => out.push(typed),
            Err(e) => return error(error_names::FAILED, format!("{}: {e}", method.name)),
        }
    }
    CallOutcome::Return(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::local::SentSignal;
    use crate::infrastructure::bus::LocalBus;
    use serde_json::json;
    use std::sync::OnceLock;

    const IFACE: &str = "com.example.Counter";
    const PATH: &str = "/com/example/Counter";
    const SCHEMA: &str = r#"
        <node>
          <interface name="org.freedesktop.DBus.Introspectable">
            <method name="Introspect"><arg type="s" direction="out"/></method>
          </interface>
          <interface name="org.freedesktop.DBus.Properties">
            <method name="Get">
              <arg type="s" direction="in"/><arg type="s" direction="in"/>
              <arg type="v" direction="out"/>
            </method>
            <method name="GetAll">
              <arg type="s" direction="in"/><arg type="a{sv}" direction="out"/>
            </method>
            <method name="Set">
              <arg type="s" direction="in"/><arg type="s" direction="in"/>
              <arg type="v" direction="in"/>
            </method>
            <signal name="PropertiesChanged">
              <arg type="s"/><arg type="a{sv}"/><arg type="as"/>
            </signal>
          </interface>
          <interface name="com.example.Counter">
            <method name="Add">
              <arg name="a" type="x" direction="in"/>
              <arg name="b" type="x" direction="in"/>
              <arg name="sum" type="x" direction="out"/>
            </method>
            <method name="Reset"/>
            <method name="Explode"/>
            <method name="Unbound"/>
            <property name="Count" type="x" access="read"/>
            <property name="Label" type="s" access="readwrite"/>
            <property name="Level" type="d" access="readwrite"/>
            <property name="Remote" type="x" access="read">
              <annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="false"/>
            </property>
            <property name="Stale" type="s" access="read">
              <annotation name="org.freedesktop.DBus.Property.EmitsChangedSignal" value="invalidates"/>
            </property>
            <signal name="Overflowed"><arg name="At" type="x"/></signal>
          </interface>
        </node>"#;

    #[derive(Default)]
    struct Counter {
        count: i64,
        label: String,
        level: f64,
        queries: Vec<String>,
    }

    fn add(_: &mut Counter, args: &[Value]) -> Result<Vec<PropertyValue>, HandlerError> {
        let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
        Ok(vec![json!(sum).into()])
    }

    fn reset(c: &mut Counter, _: &[Value]) -> Result<Vec<PropertyValue>, HandlerError> {
        c.count = 0;
        Ok(vec![])
    }

    fn explode(_: &mut Counter, _: &[Value]) -> Result<Vec<PropertyValue>, HandlerError> {
        Err(HandlerError::Custom {
            kind: "com.example.Error.Boom".to_string(),
            message: "kaboom".to_string(),
        })
    }

    fn get(c: &Counter, name: &str) -> Readout {
        match name {
            "Count" => Readout::Ready(Value::Int64(c.count).into()),
            "Label" => Readout::Ready(json!(c.label).into()),
            "Level" => Readout::Ready(Value::Double(c.level).into()),
            _ => Readout::Remote(Value::Int64(-1).into()),
        }
    }

    fn set(c: &mut Counter, name: &str, value: &Value) -> Result<(), HandlerError> {
        match (name, value) {
            ("Label", Value::Str(s)) if s.is_empty() => {
                Err(HandlerError::InvalidArgs("label may not be empty".to_string()))
            }
            ("Label", Value::Str(s)) => {
                c.label = s.clone();
                Ok(())
            }
            ("Level", Value::Double(d)) => {
                c.level = *d;
                Ok(())
            }
            _ => Err(HandlerError::Failed("unexpected".to_string())),
        }
    }

    impl DispatchTarget for Counter {
        fn dispatch_table() -> &'static DispatchTable<Self> {
            static TABLE: OnceLock<DispatchTable<Counter>> = OnceLock::new();
            TABLE.get_or_init(|| {
                DispatchTable::new()
                    .method(IFACE, "Add", add)
                    .method(IFACE, "Reset", reset)
                    .method(IFACE, "Explode", explode)
                    .read_only(IFACE, "Count", get)
                    .read_write(IFACE, "Label", get, set)
                    .read_write(IFACE, "Level", get, set)
                    .read_only(IFACE, "Remote", get)
                    .read_only(IFACE, "Stale", get)
            })
        }

        fn query_remote(&mut self, property: &str) {
            self.queries.push(property.to_string());
        }
    }

    fn setup(policy: PendingReadPolicy) -> (LocalBus, ExportedObject<crate::infrastructure::bus::LocalConnection>) {
        let bus = LocalBus::new();
        let schema = SchemaRegistry::parse(SCHEMA).unwrap();
        let object =
            ExportedObject::register(&bus, "com.example.Svc", PATH, &schema, &[IFACE], policy)
                .unwrap();
        (bus, object)
    }

    fn call(serial: u64, interface: &str, member: &str, args: Vec<Value>) -> MethodCall {
        MethodCall {
            serial,
            destination: "com.example.Svc".to_string(),
            path: PATH.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        }
    }

    fn error_name(outcome: Option<CallOutcome>) -> String {
        match outcome {
            Some(CallOutcome::Error(e)) => e.name,
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn test_register_adds_standard_interfaces() {
        let (bus, object) = setup(PendingReadPolicy::Replace);
        assert!(bus.is_owned("com.example.Svc"));
        assert_eq!(
            object.interface_names().collect::<Vec<_>>(),
            vec![IFACE, PROPERTIES_INTERFACE, INTROSPECTABLE_INTERFACE]
        );
    }

    #[test]
    fn test_register_unknown_interface_claims_nothing() {
        let bus = LocalBus::new();
        let schema = SchemaRegistry::parse(SCHEMA).unwrap();
        let result = ExportedObject::register(
            &bus,
            "com.example.Svc",
            PATH,
            &schema,
            &["com.example.Missing"],
            PendingReadPolicy::Replace,
        );
        assert!(matches!(result, Err(ExportError::UnknownInterface(_))));
        assert!(!bus.is_owned("com.example.Svc"));
    }

    #[test]
    fn test_register_name_in_use_surfaces_to_caller() {
        let bus = LocalBus::new();
        bus.claim_external("com.example.Svc");
        let schema = SchemaRegistry::parse(SCHEMA).unwrap();
        let result = ExportedObject::register(
            &bus,
            "com.example.Svc",
            PATH,
            &schema,
            &[IFACE],
            PendingReadPolicy::Replace,
        );
        assert!(matches!(
            result,
            Err(ExportError::Bus(BusError::NameInUse(_)))
        ));
    }

    // ── Method dispatch ───────────────────────────────────────────────────────

    #[test]
    fn test_method_reply_is_typed_per_out_args() {
        // Arrange
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        // Act
        object.dispatch(
            &mut target,
            call(1, IFACE, "Add", vec![Value::Int64(2), Value::Int64(3)]),
        );

        // Assert
        assert_eq!(
            bus.reply_to(1),
            Some(CallOutcome::Return(vec![Value::Int64(5)]))
        );
    }

    #[test]
    fn test_method_with_no_out_args_replies_empty() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter {
            count: 9,
            ..Counter::default()
        };

        object.dispatch(&mut target, call(1, IFACE, "Reset", vec![]));

        assert_eq!(target.count, 0);
        assert_eq!(bus.reply_to(1), Some(CallOutcome::Return(vec![])));
    }

    #[test]
    fn test_wrong_argument_types_are_invalid_args() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        object.dispatch(
            &mut target,
            call(1, IFACE, "Add", vec![Value::Int64(2), Value::string("3")]),
        );

        assert_eq!(error_name(bus.reply_to(1)), error_names::INVALID_ARGS);
    }

    #[test]
    fn test_unknown_members_map_to_standard_errors() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        object.dispatch(&mut target, call(1, "com.example.Nope", "Add", vec![]));
        object.dispatch(&mut target, call(2, IFACE, "Nope", vec![]));
        object.dispatch(&mut target, call(3, IFACE, "Unbound", vec![]));
        let mut wrong_path = call(4, IFACE, "Reset", vec![]);
        wrong_path.path = "/elsewhere".to_string();
        object.dispatch(&mut target, wrong_path);

        assert_eq!(error_name(bus.reply_to(1)), error_names::UNKNOWN_INTERFACE);
        assert_eq!(error_name(bus.reply_to(2)), error_names::UNKNOWN_METHOD);
        assert_eq!(error_name(bus.reply_to(3)), error_names::UNKNOWN_METHOD);
        assert_eq!(error_name(bus.reply_to(4)), error_names::UNKNOWN_OBJECT);
    }

    #[test]
    fn test_handler_error_keeps_dotted_kind_and_message() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        object.dispatch(&mut target, call(1, IFACE, "Explode", vec![]));

        assert_eq!(
            bus.reply_to(1),
            Some(CallOutcome::Error(RemoteError::new(
                "com.example.Error.Boom",
                "kaboom"
            )))
        );
    }

    #[test]
    fn test_handler_error_kind_is_namespaced() {
        let remote = HandlerError::InvalidTrackId("bad".to_string()).to_remote();
        assert_eq!(remote.name, "org.mpris.MediaPlayer2.Error.InvalidTrackId");
        assert_eq!(remote.message, "bad");
    }

    #[test]
    fn test_introspect_lists_registered_interfaces() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        object.dispatch(&mut target, call(1, INTROSPECTABLE_INTERFACE, "Introspect", vec![]));

        let Some(CallOutcome::Return(values)) = bus.reply_to(1) else {
            panic!("expected a return");
        };
        let xml = values[0].as_str().unwrap();
        assert!(xml.contains(r#"<interface name="com.example.Counter">"#));
        assert!(xml.contains(r#"<property name="Label" type="s" access="readwrite"/>"#));
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn get_call(serial: u64, property: &str) -> MethodCall {
        call(
            serial,
            PROPERTIES_INTERFACE,
            "Get",
            vec![Value::string(IFACE), Value::string(property)],
        )
    }

    fn set_call(serial: u64, property: &str, value: Value) -> MethodCall {
        call(
            serial,
            PROPERTIES_INTERFACE,
            "Set",
            vec![Value::string(IFACE), Value::string(property), value.into_variant()],
        )
    }

    #[test]
    fn test_get_types_value_per_declaration() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter {
            label: "hi".to_string(),
            ..Counter::default()
        };

        object.dispatch(&mut target, get_call(1, "Label"));

        assert_eq!(
            bus.reply_to(1),
            Some(CallOutcome::Return(vec![Value::string("hi").into_variant()]))
        );
    }

    #[test]
    fn test_get_unknown_property() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), get_call(1, "Nope"));
        assert_eq!(error_name(bus.reply_to(1)), error_names::UNKNOWN_PROPERTY);
    }

    #[test]
    fn test_get_remote_property_defers_until_resolved() {
        // Arrange
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        // Act
        object.dispatch(&mut target, get_call(1, "Remote"));
        let before = bus.reply_to(1);
        let completed = object.resolve("Remote", &json!(42));

        // Assert
        assert_eq!(before, None, "no reply before the value arrives");
        assert_eq!(target.queries, vec!["Remote".to_string()]);
        assert_eq!(completed, 1);
        assert_eq!(
            bus.reply_to(1),
            Some(CallOutcome::Return(vec![Value::Int64(42).into_variant()]))
        );
    }

    #[test]
    fn test_superseded_read_gets_error_reply() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        object.dispatch(&mut target, get_call(1, "Remote"));
        object.dispatch(&mut target, get_call(2, "Remote"));
        object.resolve("Remote", &json!(5));

        assert_eq!(error_name(bus.reply_to(1)), error_names::FAILED);
        assert_eq!(
            bus.reply_to(2),
            Some(CallOutcome::Return(vec![Value::Int64(5).into_variant()]))
        );
        assert_eq!(target.queries.len(), 2);
    }

    #[test]
    fn test_joined_reads_share_one_query() {
        let (bus, mut object) = setup(PendingReadPolicy::Join);
        let mut target = Counter::default();

        object.dispatch(&mut target, get_call(1, "Remote"));
        object.dispatch(&mut target, get_call(2, "Remote"));
        object.resolve("Remote", &json!(5));

        assert_eq!(target.queries.len(), 1);
        assert_eq!(bus.reply_to(1), bus.reply_to(2));
        assert!(bus.reply_to(1).is_some());
    }

    #[test]
    fn test_expired_read_replies_no_reply() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), get_call(1, "Remote"));

        let expired = object.expire_pending(
            Instant::now() + Duration::from_secs(10),
            Duration::from_secs(1),
        );

        assert_eq!(expired, 1);
        assert_eq!(error_name(bus.reply_to(1)), error_names::NO_REPLY);
    }

    #[test]
    fn test_unpublish_fails_pending_reads_and_releases_name() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), get_call(1, "Remote"));

        object.unpublish();

        assert_eq!(error_name(bus.reply_to(1)), error_names::FAILED);
        assert!(!bus.is_owned("com.example.Svc"));
    }

    #[test]
    fn test_get_all_reports_cached_value_for_remote_property() {
        // Arrange
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter {
            count: 3,
            ..Counter::default()
        };

        // Act
        object.dispatch(
            &mut target,
            call(1, PROPERTIES_INTERFACE, "GetAll", vec![Value::string(IFACE)]),
        );

        // Assert
        let Some(CallOutcome::Return(values)) = bus.reply_to(1) else {
            panic!("expected a return");
        };
        let Value::Dict { entries, .. } = &values[0] else {
            panic!("expected a dict");
        };
        assert!(entries.contains(&(Value::string("Remote"), Value::Int64(-1).into_variant())));
        assert!(entries.contains(&(Value::string("Count"), Value::Int64(3).into_variant())));
        assert!(target.queries.is_empty(), "GetAll never round-trips");
    }

    #[test]
    fn test_set_coerces_and_replies_empty() {
        // Arrange
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        let mut target = Counter::default();

        // Act: an integer for a double property
        object.dispatch(&mut target, set_call(1, "Level", Value::Int32(1)));

        // Assert
        assert_eq!(target.level, 1.0);
        assert_eq!(bus.reply_to(1), Some(CallOutcome::Return(vec![])));
    }

    #[test]
    fn test_set_read_only_property_is_rejected() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), set_call(1, "Count", Value::Int64(1)));
        assert_eq!(error_name(bus.reply_to(1)), error_names::PROPERTY_READ_ONLY);
    }

    #[test]
    fn test_set_uncoercible_value_is_invalid_args() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), set_call(1, "Level", Value::string("loud")));
        assert_eq!(error_name(bus.reply_to(1)), error_names::INVALID_ARGS);
    }

    #[test]
    fn test_setter_error_becomes_handler_error_reply() {
        let (bus, mut object) = setup(PendingReadPolicy::Replace);
        object.dispatch(&mut Counter::default(), set_call(1, "Label", Value::string("")));
        assert_eq!(
            error_name(bus.reply_to(1)),
            "org.mpris.MediaPlayer2.Error.InvalidArgs"
        );
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    fn only_signal(bus: &LocalBus) -> Signal {
        let mut signals = bus.take_signals();
        assert_eq!(signals.len(), 1, "expected exactly one signal");
        let SentSignal { signal, .. } = signals.remove(0);
        signal
    }

    #[test]
    fn test_properties_changed_respects_annotations() {
        // Arrange
        let (bus, object) = setup(PendingReadPolicy::Replace);

        // Act
        let emitted = object
            .emit_properties_changed(
                IFACE,
                &[
                    ("Count", json!(4).into()),
                    ("Remote", json!(99).into()),
                    ("Stale", json!("x").into()),
                ],
                &[],
            )
            .unwrap();

        // Assert
        assert!(emitted);
        let signal = only_signal(&bus);
        assert_eq!(signal.interface, PROPERTIES_INTERFACE);
        assert_eq!(signal.member, "PropertiesChanged");
        assert_eq!(signal.args[0], Value::string(IFACE));
        assert_eq!(signal.args[1].to_json(), Some(json!({"Count": 4})));
        assert_eq!(signal.args[2].to_json(), Some(json!(["Stale"])));
    }

    #[test]
    fn test_properties_changed_with_only_silent_properties_emits_nothing() {
        let (bus, object) = setup(PendingReadPolicy::Replace);
        let emitted = object
            .emit_properties_changed(IFACE, &[("Remote", json!(1).into())], &[])
            .unwrap();
        assert!(!emitted);
        assert!(bus.take_signals().is_empty());
    }

    #[test]
    fn test_properties_changed_rejects_undeclared_name() {
        let (_bus, object) = setup(PendingReadPolicy::Replace);
        let result = object.emit_properties_changed(IFACE, &[("Nope", json!(1).into())], &[]);
        assert!(matches!(result, Err(ExportError::UnknownProperty { .. })));
    }

    #[test]
    fn test_emit_signal_types_arguments() {
        let (bus, object) = setup(PendingReadPolicy::Replace);

        object
            .emit_signal(IFACE, "Overflowed", &[json!(10).into()])
            .unwrap();

        let signal = only_signal(&bus);
        assert_eq!(signal.member, "Overflowed");
        assert_eq!(signal.args, vec![Value::Int64(10)]);
    }

    #[test]
    fn test_emit_signal_checks_arity() {
        let (_bus, object) = setup(PendingReadPolicy::Replace);
        assert!(matches!(
            object.emit_signal(IFACE, "Overflowed", &[]),
            Err(ExportError::SignalArity { .. })
        ));
    }

    #[test]
    fn test_coerce_wraps_plain_value_in_variant() {
        let value = coerce(&Value::Int64(1), &TypeTag::Variant).unwrap();
        assert_eq!(value, Value::Int64(1).into_variant());
    }
}

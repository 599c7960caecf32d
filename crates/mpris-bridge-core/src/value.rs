//! Typed values of the desktop bus and their conversion from/to JSON.
//!
//! The browser speaks untyped JSON; the bus is strictly typed by signatures
//! (`s`, `x`, `a{sv}`, ...).  The bridge keeps browser values as JSON and
//! re-types them at the bus boundary against the type declared in the
//! interface schema:
//!
//! ```text
//! JSON  ──Value::from_json(json, declared)──►  Value  ──► bus
//! bus   ──►  Value  ──Value::to_json()──►  JSON  ──► browser command
//! ```
//!
//! # Signature grammar
//!
//! | code | type        | code   | type                    |
//! |------|-------------|--------|-------------------------|
//! | `y`  | byte        | `s`    | string                  |
//! | `b`  | boolean     | `o`    | object path             |
//! | `n`  | int16       | `g`    | signature               |
//! | `q`  | uint16      | `v`    | variant                 |
//! | `i`  | int32       | `aT`   | array of `T`            |
//! | `u`  | uint32      | `a{KV}`| dictionary              |
//! | `x`  | int64       | `(..)` | struct                  |
//! | `t`  | uint64      |        |                         |
//! | `d`  | double      |        |                         |

use std::fmt;

use serde_json::{Map, Number, Value as JsonValue};
use thiserror::Error;

/// Errors raised while parsing signatures or re-typing values.
#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    /// The signature text is not a valid (sequence of) complete type(s).
    #[error("invalid type signature: {0:?}")]
    InvalidSignature(String),

    /// The JSON value cannot represent the declared type.
    #[error("expected a value of type `{expected}`, got {found}")]
    TypeMismatch { expected: String, found: String },

    /// An integer does not fit the declared integer type.
    #[error("value {value} out of range for type `{expected}`")]
    OutOfRange { expected: String, value: String },

    /// A string declared as `o` is not a legal object path.
    #[error("invalid object path: {0:?}")]
    InvalidObjectPath(String),

    /// JSON `null` has no bus representation.
    #[error("null cannot be represented on the bus")]
    Null,
}

// ── TypeTag ───────────────────────────────────────────────────────────────────

/// One complete bus type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    Str,
    ObjectPath,
    Signature,
    Variant,
    Array(Box<TypeTag>),
    Dict(Box<TypeTag>, Box<TypeTag>),
    Struct(Vec<TypeTag>),
}

impl TypeTag {
    /// Parses exactly one complete type.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidSignature`] for empty input, trailing
    /// characters, unknown codes, or non-basic dictionary keys.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mpris_bridge_core::value::TypeTag;
    ///
    /// let tag = TypeTag::parse("a{sv}").unwrap();
    /// assert_eq!(tag.to_string(), "a{sv}");
    /// ```
    pub fn parse(signature: &str) -> Result<Self, ValueError> {
        let mut tags = Self::parse_many(signature)?;
        if tags.len() != 1 {
            return Err(ValueError::InvalidSignature(signature.to_string()));
        }
        Ok(tags.remove(0))
    }

    /// Parses a sequence of complete types (an argument list).  The empty
    /// string is the empty sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidSignature`] if any type is malformed.
    pub fn parse_many(signature: &str) -> Result<Vec<Self>, ValueError> {
        let bytes = signature.as_bytes();
        let mut pos = 0;
        let mut tags = Vec::new();
        while pos < bytes.len() {
            tags.push(parse_one(signature, bytes, &mut pos)?);
        }
        Ok(tags)
    }

    /// `true` for the fixed and string-like types allowed as dictionary keys.
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Self::Variant | Self::Array(_) | Self::Dict(..) | Self::Struct(_)
        )
    }
}

fn parse_one(signature: &str, bytes: &[u8], pos: &mut usize) -> Result<TypeTag, ValueError> {
    let invalid = || ValueError::InvalidSignature(signature.to_string());
    let code = *bytes.get(*pos).ok_or_else(invalid)?;
    *pos += 1;

    let tag = match code {
        b'y' => TypeTag::Byte,
        b'b' => TypeTag::Bool,
        b'n' => TypeTag::Int16,
        b'q' => TypeTag::UInt16,
        b'i' => TypeTag::Int32,
        b'u' => TypeTag::UInt32,
        b'x' => TypeTag::Int64,
        b't' => TypeTag::UInt64,
        b'd' => TypeTag::Double,
        b's' => TypeTag::Str,
        b'o' => TypeTag::ObjectPath,
        b'g' => TypeTag::Signature,
        b'v' => TypeTag::Variant,
        b'a' if bytes.get(*pos) == Some(&b'{') => {
            *pos += 1;
            let key = parse_one(signature, bytes, pos)?;
            if !key.is_basic() {
                return Err(invalid());
            }
            let value = parse_one(signature, bytes, pos)?;
            if bytes.get(*pos) != Some(&b'}') {
                return Err(invalid());
            }
            *pos += 1;
            TypeTag::Dict(Box::new(key), Box::new(value))
        }
        b'a' => TypeTag::Array(Box::new(parse_one(signature, bytes, pos)?)),
        b'(' => {
            let mut fields = Vec::new();
            while bytes.get(*pos) != Some(&b')') {
                fields.push(parse_one(signature, bytes, pos)?);
            }
            *pos += 1;
            if fields.is_empty() {
                return Err(invalid());
            }
            TypeTag::Struct(fields)
        }
        _ => return Err(invalid()),
    };
    Ok(tag)
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => f.write_str("y"),
            Self::Bool => f.write_str("b"),
            Self::Int16 => f.write_str("n"),
            Self::UInt16 => f.write_str("q"),
            Self::Int32 => f.write_str("i"),
            Self::UInt32 => f.write_str("u"),
            Self::Int64 => f.write_str("x"),
            Self::UInt64 => f.write_str("t"),
            Self::Double => f.write_str("d"),
            Self::Str => f.write_str("s"),
            Self::ObjectPath => f.write_str("o"),
            Self::Signature => f.write_str("g"),
            Self::Variant => f.write_str("v"),
            Self::Array(elem) => write!(f, "a{elem}"),
            Self::Dict(key, value) => write!(f, "a{{{key}{value}}}"),
            Self::Struct(fields) => {
                f.write_str("(")?;
                for field in fields {
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// A typed bus value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    Variant(Box<Value>),
    Array {
        elem: TypeTag,
        items: Vec<Value>,
    },
    Dict {
        key: TypeTag,
        value: TypeTag,
        entries: Vec<(Value, Value)>,
    },
    Struct(Vec<Value>),
}

impl Value {
    /// Shorthand for [`Value::Str`].
    pub fn string(text: impl Into<String>) -> Self {
        Self::Str(text.into())
    }

    /// Wraps `self` in a variant.
    pub fn into_variant(self) -> Self {
        Self::Variant(Box::new(self))
    }

    /// Returns the type of this value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Byte(_) => TypeTag::Byte,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int16(_) => TypeTag::Int16,
            Self::UInt16(_) => TypeTag::UInt16,
            Self::Int32(_) => TypeTag::Int32,
            Self::UInt32(_) => TypeTag::UInt32,
            Self::Int64(_) => TypeTag::Int64,
            Self::UInt64(_) => TypeTag::UInt64,
            Self::Double(_) => TypeTag::Double,
            Self::Str(_) => TypeTag::Str,
            Self::ObjectPath(_) => TypeTag::ObjectPath,
            Self::Signature(_) => TypeTag::Signature,
            Self::Variant(_) => TypeTag::Variant,
            Self::Array { elem, .. } => TypeTag::Array(Box::new(elem.clone())),
            Self::Dict { key, value, .. } => {
                TypeTag::Dict(Box::new(key.clone()), Box::new(value.clone()))
            }
            Self::Struct(fields) => TypeTag::Struct(fields.iter().map(Value::type_tag).collect()),
        }
    }

    /// `true` if this value has exactly the type `tag`.
    pub fn conforms_to(&self, tag: &TypeTag) -> bool {
        self.type_tag() == *tag
    }

    /// Returns the string payload of `s`, `o` and `g` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjectPath(s) | Self::Signature(s) => Some(s),
            _ => None,
        }
    }

    /// Returns any integer value that fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Byte(n) => Some(i64::from(n)),
            Self::Int16(n) => Some(i64::from(n)),
            Self::UInt16(n) => Some(i64::from(n)),
            Self::Int32(n) => Some(i64::from(n)),
            Self::UInt32(n) => Some(i64::from(n)),
            Self::Int64(n) => Some(n),
            Self::UInt64(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Strips any number of variant wrappers.
    pub fn unwrap_variant(&self) -> &Value {
        match self {
            Self::Variant(inner) => inner.unwrap_variant(),
            other => other,
        }
    }

    /// Re-types a JSON value as the declared type `tag`.
    ///
    /// Integer types accept JSON integers and finite floats (truncated toward
    /// zero, since JavaScript has a single number type).  A variant infers
    /// its content type from the JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when the JSON value has the wrong shape, an
    /// integer is out of range, an object path is malformed, or the value is
    /// `null`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mpris_bridge_core::value::{TypeTag, Value};
    /// use serde_json::json;
    ///
    /// let v = Value::from_json(&json!(42.9), &TypeTag::Int64).unwrap();
    /// assert_eq!(v, Value::Int64(42));
    /// ```
    pub fn from_json(json: &JsonValue, tag: &TypeTag) -> Result<Self, ValueError> {
        if json.is_null() {
            return Err(ValueError::Null);
        }
        let mismatch = || ValueError::TypeMismatch {
            expected: tag.to_string(),
            found: describe(json),
        };

        let value = match tag {
            TypeTag::Bool => Self::Bool(json.as_bool().ok_or_else(mismatch)?),
            TypeTag::Byte => Self::Byte(integral(json, tag)?),
            TypeTag::Int16 => Self::Int16(integral(json, tag)?),
            TypeTag::UInt16 => Self::UInt16(integral(json, tag)?),
            TypeTag::Int32 => Self::Int32(integral(json, tag)?),
            TypeTag::UInt32 => Self::UInt32(integral(json, tag)?),
            TypeTag::Int64 => Self::Int64(integral(json, tag)?),
            TypeTag::UInt64 => Self::UInt64(integral(json, tag)?),
            TypeTag::Double => Self::Double(json.as_f64().ok_or_else(mismatch)?),
            TypeTag::Str => Self::Str(json.as_str().ok_or_else(mismatch)?.to_string()),
            TypeTag::ObjectPath => {
                let path = json.as_str().ok_or_else(mismatch)?;
                if !is_valid_object_path(path) {
                    return Err(ValueError::InvalidObjectPath(path.to_string()));
                }
                Self::ObjectPath(path.to_string())
            }
            TypeTag::Signature => {
                let text = json.as_str().ok_or_else(mismatch)?;
                TypeTag::parse_many(text)?;
                Self::Signature(text.to_string())
            }
            TypeTag::Variant => Self::Variant(Box::new(Self::infer(json)?)),
            TypeTag::Array(elem) => {
                let items = json
                    .as_array()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(|item| Self::from_json(item, elem))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Array {
                    elem: (**elem).clone(),
                    items,
                }
            }
            TypeTag::Dict(key, value) => {
                let object = json.as_object().ok_or_else(mismatch)?;
                Self::Dict {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    entries: dict_entries(object, key, value)?,
                }
            }
            TypeTag::Struct(fields) => {
                let items = json.as_array().ok_or_else(mismatch)?;
                if items.len() != fields.len() {
                    return Err(mismatch());
                }
                Self::Struct(
                    items
                        .iter()
                        .zip(fields)
                        .map(|(item, field)| Self::from_json(item, field))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
        };
        Ok(value)
    }

    /// Picks a bus type for a JSON value of unknown declared type (variant
    /// content).
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Null`] for `null`.
    pub fn infer(json: &JsonValue) -> Result<Self, ValueError> {
        let value = match json {
            JsonValue::Null => return Err(ValueError::Null),
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt64(u)
                } else {
                    Self::Double(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Self::Str(s.clone()),
            JsonValue::Array(items) if items.iter().all(JsonValue::is_string) => Self::Array {
                elem: TypeTag::Str,
                items: items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(Self::string)
                    .collect(),
            },
            JsonValue::Array(items) => Self::Array {
                elem: TypeTag::Variant,
                items: items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| Self::infer(item).map(Self::into_variant))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            JsonValue::Object(object) => Self::Dict {
                key: TypeTag::Str,
                value: TypeTag::Variant,
                entries: dict_entries(object, &TypeTag::Str, &TypeTag::Variant)?,
            },
        };
        Ok(value)
    }

    /// Converts back to JSON for an outbound command.
    ///
    /// Returns `None` if the value contains a non-finite double, which JSON
    /// cannot carry.
    pub fn to_json(&self) -> Option<JsonValue> {
        let json = match self {
            Self::Byte(n) => JsonValue::from(*n),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int16(n) => JsonValue::from(*n),
            Self::UInt16(n) => JsonValue::from(*n),
            Self::Int32(n) => JsonValue::from(*n),
            Self::UInt32(n) => JsonValue::from(*n),
            Self::Int64(n) => JsonValue::from(*n),
            Self::UInt64(n) => JsonValue::from(*n),
            Self::Double(d) => JsonValue::Number(Number::from_f64(*d)?),
            Self::Str(s) | Self::ObjectPath(s) | Self::Signature(s) => JsonValue::String(s.clone()),
            Self::Variant(inner) => inner.to_json()?,
            Self::Array { items, .. } | Self::Struct(items) => JsonValue::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Dict { entries, .. } => {
                let mut object = Map::new();
                for (key, value) in entries {
                    let key = match key.to_json()? {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    };
                    object.insert(key, value.to_json()?);
                }
                JsonValue::Object(object)
            }
        };
        Some(json)
    }
}

fn dict_entries(
    object: &Map<String, JsonValue>,
    key: &TypeTag,
    value: &TypeTag,
) -> Result<Vec<(Value, Value)>, ValueError> {
    let mut entries = Vec::with_capacity(object.len());
    for (k, v) in object {
        // Absent metadata is sent as null by the extension; leave it out.
        if v.is_null() {
            continue;
        }
        let key_json = match key {
            TypeTag::Str | TypeTag::ObjectPath | TypeTag::Signature => JsonValue::String(k.clone()),
            _ => serde_json::from_str(k).map_err(|_| ValueError::TypeMismatch {
                expected: key.to_string(),
                found: format!("key {k:?}"),
            })?,
        };
        entries.push((Value::from_json(&key_json, key)?, Value::from_json(v, value)?));
    }
    Ok(entries)
}

/// Extracts an integer from JSON and narrows it to `T`.
fn integral<T: TryFrom<i128>>(json: &JsonValue, tag: &TypeTag) -> Result<T, ValueError> {
    let wide = if let Some(i) = json.as_i64() {
        i128::from(i)
    } else if let Some(u) = json.as_u64() {
        i128::from(u)
    } else if let Some(f) = json.as_f64().filter(|f| f.is_finite()) {
        f.trunc() as i128
    } else {
        return Err(ValueError::TypeMismatch {
            expected: tag.to_string(),
            found: describe(json),
        });
    };
    T::try_from(wide).map_err(|_| ValueError::OutOfRange {
        expected: tag.to_string(),
        value: wide.to_string(),
    })
}

fn describe(json: &JsonValue) -> String {
    match json {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(_) => "a boolean".to_string(),
        JsonValue::Number(n) => format!("the number {n}"),
        JsonValue::String(_) => "a string".to_string(),
        JsonValue::Array(_) => "an array".to_string(),
        JsonValue::Object(_) => "an object".to_string(),
    }
}

/// Checks object-path syntax: `/` or `/`-separated non-empty elements of
/// `[A-Za-z0-9_]`, no trailing slash.
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Signatures ────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_basic_and_container_types() {
        assert_eq!(TypeTag::parse("x").unwrap(), TypeTag::Int64);
        assert_eq!(
            TypeTag::parse("as").unwrap(),
            TypeTag::Array(Box::new(TypeTag::Str))
        );
        assert_eq!(
            TypeTag::parse("a{sv}").unwrap(),
            TypeTag::Dict(Box::new(TypeTag::Str), Box::new(TypeTag::Variant))
        );
        assert_eq!(
            TypeTag::parse("(sx)").unwrap(),
            TypeTag::Struct(vec![TypeTag::Str, TypeTag::Int64])
        );
    }

    #[test]
    fn test_parse_many_splits_argument_list() {
        let tags = TypeTag::parse_many("ox").unwrap();
        assert_eq!(tags, vec![TypeTag::ObjectPath, TypeTag::Int64]);
        assert!(TypeTag::parse_many("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_signatures() {
        for bad in ["", "a", "a{vs}", "a{s", "()", "z", "ss"] {
            assert!(TypeTag::parse(bad).is_err(), "{bad:?} must be rejected");
        }
    }

    #[test]
    fn test_display_reproduces_signature() {
        for sig in ["a{sv}", "aas", "(ia{sx})", "o"] {
            assert_eq!(TypeTag::parse(sig).unwrap().to_string(), sig);
        }
    }

    // ── JSON → Value ──────────────────────────────────────────────────────────

    #[test]
    fn test_from_json_truncates_float_for_integer_types() {
        let v = Value::from_json(&json!(12.75), &TypeTag::Int64).unwrap();
        assert_eq!(v, Value::Int64(12));
    }

    #[test]
    fn test_from_json_rejects_out_of_range_integer() {
        let result = Value::from_json(&json!(300), &TypeTag::Byte);
        assert!(matches!(result, Err(ValueError::OutOfRange { .. })));
    }

    #[test]
    fn test_from_json_rejects_wrong_shape() {
        let result = Value::from_json(&json!("1.0"), &TypeTag::Double);
        assert!(matches!(result, Err(ValueError::TypeMismatch { .. })));
    }

    #[test]
    fn test_from_json_rejects_null() {
        assert_eq!(
            Value::from_json(&JsonValue::Null, &TypeTag::Str),
            Err(ValueError::Null)
        );
    }

    #[test]
    fn test_from_json_validates_object_path() {
        assert!(Value::from_json(&json!("/org/mpris/A_1"), &TypeTag::ObjectPath).is_ok());
        assert!(matches!(
            Value::from_json(&json!("not/a/path"), &TypeTag::ObjectPath),
            Err(ValueError::InvalidObjectPath(_))
        ));
    }

    #[test]
    fn test_from_json_dict_skips_null_entries_and_infers_variants() {
        // Arrange
        let tag = TypeTag::parse("a{sv}").unwrap();
        let json = json!({"xesam:title": "Song", "mpris:length": 1000, "gone": null});

        // Act
        let value = Value::from_json(&json, &tag).unwrap();

        // Assert
        let Value::Dict { entries, .. } = value else {
            panic!("expected a dict");
        };
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&(
            Value::string("mpris:length"),
            Value::Int64(1000).into_variant()
        )));
    }

    #[test]
    fn test_infer_string_array_is_as() {
        let value = Value::infer(&json!(["a", "b"])).unwrap();
        assert_eq!(value.type_tag(), TypeTag::parse("as").unwrap());
    }

    #[test]
    fn test_infer_mixed_array_is_av() {
        let value = Value::infer(&json!(["a", 1])).unwrap();
        assert_eq!(value.type_tag(), TypeTag::parse("av").unwrap());
    }

    // ── Value → JSON ──────────────────────────────────────────────────────────

    #[test]
    fn test_to_json_non_finite_double_is_none() {
        assert_eq!(Value::Double(f64::NAN).to_json(), None);
        assert_eq!(Value::Double(f64::INFINITY).to_json(), None);
    }

    #[test]
    fn test_to_json_unwraps_variants() {
        let v = Value::Int64(5).into_variant();
        assert_eq!(v.to_json(), Some(json!(5)));
    }

    #[test]
    fn test_conforms_to_compares_full_type() {
        let v = Value::Array {
            elem: TypeTag::Str,
            items: vec![Value::string("http")],
        };
        assert!(v.conforms_to(&TypeTag::parse("as").unwrap()));
        assert!(!v.conforms_to(&TypeTag::parse("av").unwrap()));
    }

    #[test]
    fn test_object_path_validation() {
        assert!(is_valid_object_path("/"));
        assert!(is_valid_object_path("/org/mpris/MediaPlayer2"));
        assert!(!is_valid_object_path("/trailing/"));
        assert!(!is_valid_object_path("/double//slash"));
        assert!(!is_valid_object_path("/bad-char"));
        assert!(!is_valid_object_path(""));
    }
}

//! # Message values and their declared kinds.
//!
//! A channel key is declared with a [`ValueKind`] and holds a [`Value`] of
//! exactly that kind for its whole life. The kind set is closed: five wire-safe
//! kinds plus [`ValueKind::Opaque`] for arbitrary shared objects that never
//! cross a process boundary.
//!
//! [`MessageValue`] is the typed sugar layer: it maps plain Rust types onto
//! kinds so capability handles can expose `get::<i64>("limit")`-style
//! accessors without the caller touching [`Value`] directly.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Declared type of a channel key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean flag.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    Str,
    /// Raw byte buffer.
    Bytes,
    /// Structured JSON document.
    Json,
    /// Arbitrary shared object; in-memory only, never serializable.
    Opaque,
}

impl ValueKind {
    /// Stable lowercase name for error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::Bytes => "bytes",
            ValueKind::Json => "json",
            ValueKind::Opaque => "opaque",
        }
    }
}

/// Shared opaque payload. Clones share the same underlying object.
#[derive(Clone)]
pub struct OpaqueValue(Arc<dyn Any + Send + Sync>);

impl OpaqueValue {
    /// Wraps an arbitrary object for in-memory channel storage.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Attempts to view the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Attempts to take shared ownership of the payload as `T`.
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Arc<T>, Self> {
        self.0.downcast::<T>().map_err(Self)
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpaqueValue(..)")
    }
}

/// A value stored under a channel key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw byte buffer.
    Bytes(Vec<u8>),
    /// Structured JSON document. `Null` payloads are rejected at store level.
    Json(serde_json::Value),
    /// Arbitrary shared object; cannot cross a process boundary.
    Opaque(OpaqueValue),
}

impl Value {
    /// The kind this value belongs to.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Json(_) => ValueKind::Json,
            Value::Opaque(_) => ValueKind::Opaque,
        }
    }

    /// True for payloads the store rejects as null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Json(serde_json::Value::Null))
    }

    /// Renders the value for logs; opaque payloads stay opaque.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Bytes(v) => format!("<{} bytes>", v.len()),
            Value::Json(v) => v.to_string(),
            Value::Opaque(_) => "<opaque>".to_string(),
        }
    }
}

/// Conversion between plain Rust types and channel [`Value`]s.
///
/// Implemented for the wire-safe kinds. Opaque payloads go through the
/// explicit `*_opaque` channel methods instead.
pub trait MessageValue: Sized + Send {
    /// The kind this type maps to.
    const KIND: ValueKind;

    /// Wraps the value for storage.
    fn into_value(self) -> Value;

    /// Unwraps a stored value of the matching kind.
    ///
    /// Returns `None` on kind mismatch; the store reports that as a
    /// type-mismatch error before this is ever reached.
    fn from_value(value: Value) -> Option<Self>;
}

impl MessageValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl MessageValue for i64 {
    const KIND: ValueKind = ValueKind::Int;

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl MessageValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl MessageValue for String {
    const KIND: ValueKind = ValueKind::Str;

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl MessageValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl MessageValue for serde_json::Value {
    const KIND: ValueKind = ValueKind::Json;

    fn into_value(self) -> Value {
        Value::Json(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    String => Str,
    Vec<u8> => Bytes,
    serde_json::Value => Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_message_value() {
        assert_eq!(i64::from_value(7i64.into_value()), Some(7));
        assert_eq!(String::from_value("x".to_string().into_value()), Some("x".to_string()));
        assert_eq!(bool::from_value(Value::Int(1)), None);
    }

    #[test]
    fn null_json_is_flagged() {
        assert!(Value::Json(serde_json::Value::Null).is_null());
        assert!(!Value::Json(serde_json::json!({"a": 1})).is_null());
    }

    #[test]
    fn opaque_downcasts() {
        let v = OpaqueValue::new(vec![1u32, 2, 3]);
        assert_eq!(v.downcast_ref::<Vec<u32>>().map(Vec::len), Some(3));
        assert!(v.downcast_ref::<String>().is_none());
    }
}

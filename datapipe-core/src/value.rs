//! The tagged-union element type flowing through pipelines

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::memory::ByteBuffer;
use crate::text::ImmutableText;

/// A value produced and consumed by pipeline stages
///
/// Values are cheap to move; cloning is deep for lists and maps, while
/// text and byte payloads share their backing storage through
/// [`ImmutableText`] and [`ByteBuffer`] reference semantics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// No value
    Absent,

    /// Boolean scalar
    Bool(bool),

    /// Integer scalar
    Int(i64),

    /// Floating-point scalar
    Float(f64),

    /// Immutable UTF-8 text
    Text(ImmutableText),

    /// Ordered list of values
    List(Vec<Value>),

    /// Immutable byte buffer
    Bytes(ByteBuffer),

    /// String-keyed mapping of values
    Map(BTreeMap<ImmutableText, Value>),
}

impl Value {
    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Bytes(_) => "bytes",
            Value::Map(_) => "map",
        }
    }

    /// Whether this is `Value::Absent`
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// The boolean payload, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if any
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The floating-point payload, if any
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The text payload, if any
    pub fn as_text(&self) -> Option<&ImmutableText> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// The list payload, if any
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// The byte payload, if any
    pub fn as_bytes(&self) -> Option<&ByteBuffer> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The map payload, if any
    pub fn as_map(&self) -> Option<&BTreeMap<ImmutableText, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Consume the value, returning the list payload if any
    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Length of a sequence-like value: list length, text code-point
    /// count, or byte count. `None` for scalars and maps.
    pub fn sequence_length(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(l.len()),
            Value::Text(t) => Some(t.char_count()),
            Value::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Absent
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(ImmutableText::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(ImmutableText::from(s))
    }
}

impl From<ImmutableText> for Value {
    fn from(t: ImmutableText) -> Self {
        Value::Text(t)
    }
}

impl From<ByteBuffer> for Value {
    fn from(b: ByteBuffer) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<ImmutableText, Value>> for Value {
    fn from(m: BTreeMap<ImmutableText, Value>) -> Self {
        Value::Map(m)
    }
}

//! A dynamic payload tree that, unlike [`serde_json::Value`], can hold binary data.
//!
//! Event arguments and ack responses are carried as [`Value`]s between the parser,
//! the adapters and user handlers. Typed data goes in and out with [`to_value`],
//! [`from_value`], [`to_args`] and [`from_args`].
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Number;

mod de;
mod ser;

pub use de::{from_args, from_value};
pub use ser::{to_args, to_value};

/// Error returned when converting typed data to and from a [`Value`].
pub type ValueError = serde_json::Error;

/// A payload value, similar to [`serde_json::Value`], that can hold binary payloads.
///
/// The [`Serialize`] implementation writes [`Value::Binary`] with `serialize_bytes`,
/// so binary data survives formats like msgpack. It is not the json wire format:
/// parsers replace binary values with placeholders themselves.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// A json `null`
    #[default]
    Null,
    /// A json boolean
    Bool(bool),
    /// A json number
    Number(Number),
    /// A json string
    String(String),
    /// A binary payload, sent out of band by the text parser
    Binary(Bytes),
    /// A json array
    Array(Vec<Value>),
    /// A json object
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Convert any serializable data into a [`Value`].
    pub fn from_data<T: ?Sized + Serialize>(data: &T) -> Result<Value, ValueError> {
        to_value(data)
    }

    /// Interpret the value as a `T`.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ValueError> {
        from_value(self)
    }

    /// Returns the string if the value is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if the value is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number as `i64` if it fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the number as `u64` if it fits
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Returns the binary payload if the value is binary
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the elements if the value is an array
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the map if the value is an object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Look up a field of an object
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// Returns true for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if the value contains a binary payload at any depth.
    pub fn has_binary(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Array(a) => a.iter().any(Value::has_binary),
            Value::Object(o) => o.values().any(Value::has_binary),
            _ => false,
        }
    }

    /// Counts the binary payloads contained in the value.
    pub fn count_binary(&self) -> usize {
        match self {
            Value::Binary(_) => 1,
            Value::Array(a) => a.iter().map(Value::count_binary).sum(),
            Value::Object(o) => o.values().map(Value::count_binary).sum(),
            _ => 0,
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Number(value.into())
                }
            }
        )*
    };
}
impl_from_number!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}
impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}
impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Object(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Binary(b) => serializer.serialize_bytes(b),
            Value::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for elem in a {
                    seq.serialize_element(elem)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let mut map = serializer.serialize_map(Some(o.len()))?;
                for (key, value) in o {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

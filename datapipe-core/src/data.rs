//! The record value type flowing through pipelines

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An opaque tagged record value.
///
/// The pipeline runtime is polymorphic over this set of cases; it never
/// inspects payloads except through user-supplied callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Data {
    /// Signed integer
    Int(i64),

    /// Floating-point number
    Float(f64),

    /// UTF-8 string
    String(String),

    /// Raw byte payload
    Bytes(Vec<u8>),

    /// Ordered list of records
    List(Vec<Data>),

    /// Mapping from string keys to records
    Map(BTreeMap<String, Data>),
}

impl Data {
    /// Name of the value's case, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Data::Int(_) => "int",
            Data::Float(_) => "float",
            Data::String(_) => "string",
            Data::Bytes(_) => "bytes",
            Data::List(_) => "list",
            Data::Map(_) => "map",
        }
    }

    /// Returns the integer payload if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Data::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the float payload if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Data::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string payload if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the byte payload if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Bytes(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the element list if this is a `List`.
    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the key-value mapping if this is a `Map`.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Data>> {
        match self {
            Data::Map(values) => Some(values),
            _ => None,
        }
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Int(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Float(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::String(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::String(value)
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Data::Bytes(value)
    }
}

impl From<Vec<Data>> for Data {
    fn from(value: Vec<Data>) -> Self {
        Data::List(value)
    }
}

impl From<BTreeMap<String, Data>> for Data {
    fn from(value: BTreeMap<String, Data>) -> Self {
        Data::Map(value)
    }
}

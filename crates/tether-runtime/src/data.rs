//! The dynamic value model the codec operates on.
//!
//! [`Data`] plays the role `serde_json::Value` plays at the transport
//! boundary, extended with the shapes the bridge must round-trip with full
//! fidelity: undefined, dates, binary, keyed maps, sets, errors, shared
//! constants, and live references to bridgeable objects.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::object::Obj;

/// A value traveling through the bridge.
#[derive(Clone)]
pub enum Data {
    Null,
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Byte array (`'u8'` on the wire).
    Bytes(Vec<u8>),
    /// Raw buffer (`'ab'` on the wire).
    Buffer(Vec<u8>),
    List(Vec<Data>),
    Record(IndexMap<String, Data>),
    /// Keyed map with arbitrary keys (`'M'` on the wire).
    Map(Vec<(Data, Data)>),
    /// Set of members (`'S'` on the wire).
    Set(Vec<Data>),
    Error(Arc<ErrorData>),
    /// A live reference to a bridgeable object (owned or proxy).
    Object(Obj),
    /// A process-wide shared constant, carried by name.
    Shared(String),
}

impl Data {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Int(n) => Some(*n as f64),
            Data::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Data>> {
        match self {
            Data::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Obj> {
        match self {
            Data::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorData> {
        match self {
            Data::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Data::Undefined)
    }

    /// Wraps a bridgeable object handle.
    pub fn object(obj: &impl crate::object::AsObj) -> Self {
        Data::Object(obj.as_obj())
    }

    /// Wraps an error payload.
    pub fn error(err: ErrorData) -> Self {
        Data::Error(Arc::new(err))
    }

    /// Builds a record from key/value pairs.
    pub fn record<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Data>,
        I: IntoIterator<Item = (K, V)>,
    {
        Data::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Null, Data::Null) => true,
            (Data::Undefined, Data::Undefined) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Int(a), Data::Int(b)) => a == b,
            // NaN compares equal to itself so the diff loop does not
            // re-send a NaN-valued property on every flush.
            (Data::Float(a), Data::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Date(a), Data::Date(b)) => a == b,
            (Data::Bytes(a), Data::Bytes(b)) => a == b,
            (Data::Buffer(a), Data::Buffer(b)) => a == b,
            (Data::List(a), Data::List(b)) => a == b,
            (Data::Record(a), Data::Record(b)) => a == b,
            (Data::Map(a), Data::Map(b)) => a == b,
            (Data::Set(a), Data::Set(b)) => a == b,
            (Data::Error(a), Data::Error(b)) => Arc::ptr_eq(a, b) || a == b,
            // Object handles compare by identity, like the registries do.
            (Data::Object(a), Data::Object(b)) => Arc::ptr_eq(a, b),
            (Data::Shared(a), Data::Shared(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Null => f.write_str("Null"),
            Data::Undefined => f.write_str("Undefined"),
            Data::Bool(v) => write!(f, "Bool({v})"),
            Data::Int(v) => write!(f, "Int({v})"),
            Data::Float(v) => write!(f, "Float({v})"),
            Data::String(v) => write!(f, "String({v:?})"),
            Data::Date(v) => write!(f, "Date({v})"),
            Data::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Data::Buffer(v) => write!(f, "Buffer({} bytes)", v.len()),
            Data::List(v) => f.debug_tuple("List").field(v).finish(),
            Data::Record(v) => {
                let mut map = f.debug_map();
                for (k, val) in v {
                    map.entry(k, val);
                }
                map.finish()
            }
            Data::Map(v) => f.debug_tuple("Map").field(v).finish(),
            Data::Set(v) => f.debug_tuple("Set").field(v).finish(),
            Data::Error(v) => write!(f, "Error({v})"),
            Data::Object(obj) => write!(f, "Object(#{:?})", obj.magic().peek_local_id()),
            Data::Shared(id) => write!(f, "Shared({id:?})"),
        }
    }
}

impl From<bool> for Data {
    fn from(v: bool) -> Self {
        Data::Bool(v)
    }
}

impl From<i32> for Data {
    fn from(v: i32) -> Self {
        Data::Int(v as i64)
    }
}

impl From<i64> for Data {
    fn from(v: i64) -> Self {
        Data::Int(v)
    }
}

impl From<f64> for Data {
    fn from(v: f64) -> Self {
        Data::Float(v)
    }
}

impl From<&str> for Data {
    fn from(v: &str) -> Self {
        Data::String(v.to_string())
    }
}

impl From<String> for Data {
    fn from(v: String) -> Self {
        Data::String(v)
    }
}

impl From<DateTime<Utc>> for Data {
    fn from(v: DateTime<Utc>) -> Self {
        Data::Date(v)
    }
}

impl From<Vec<Data>> for Data {
    fn from(v: Vec<Data>) -> Self {
        Data::List(v)
    }
}

impl From<ErrorData> for Data {
    fn from(v: ErrorData) -> Self {
        Data::Error(Arc::new(v))
    }
}

impl From<Obj> for Data {
    fn from(v: Obj) -> Self {
        Data::Object(v)
    }
}

/// The closed set of wire error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBase {
    Eval,
    Range,
    Reference,
    Syntax,
    Type,
    Uri,
}

impl ErrorBase {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorBase::Eval => "EvalError",
            ErrorBase::Range => "RangeError",
            ErrorBase::Reference => "ReferenceError",
            ErrorBase::Syntax => "SyntaxError",
            ErrorBase::Type => "TypeError",
            ErrorBase::Uri => "URIError",
        }
    }

    /// Maps a wire constructor name back to the class, `None` for anything
    /// outside the fixed set (unpacked as a generic error).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EvalError" => Some(ErrorBase::Eval),
            "RangeError" => Some(ErrorBase::Range),
            "ReferenceError" => Some(ErrorBase::Reference),
            "SyntaxError" => Some(ErrorBase::Syntax),
            "TypeError" => Some(ErrorBase::Type),
            "URIError" => Some(ErrorBase::Uri),
            _ => None,
        }
    }
}

/// A structured error value: class, message, stack, and any extra own
/// properties, all of which survive the wire unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorData {
    pub base: Option<ErrorBase>,
    pub message: String,
    pub stack: Option<String>,
    pub props: IndexMap<String, Data>,
}

impl ErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            base: None,
            message: message.into(),
            stack: None,
            props: IndexMap::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            base: Some(ErrorBase::Type),
            ..Self::new(message)
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self {
            base: Some(ErrorBase::Range),
            ..Self::new(message)
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: impl Into<Data>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for ErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.base.map(ErrorBase::as_str).unwrap_or("Error");
        write!(f, "{}: {}", class, self.message)
    }
}

impl std::error::Error for ErrorData {}

impl From<crate::error::Error> for ErrorData {
    fn from(err: crate::error::Error) -> Self {
        match err {
            crate::error::Error::Remote(data) => data,
            other => ErrorData {
                base: other.base(),
                message: other.to_string(),
                stack: None,
                props: IndexMap::new(),
            },
        }
    }
}

//! Record Data Structure
//!
//! This module defines the `Record` type, the unit of data flowing through
//! every stage of the pipeline: producers publish records, shard readers
//! yield them, the archive writer persists them, and replay readers hand
//! them back out.
//!
//! ## What is a Record?
//!
//! A record is a schema-less mapping from string keys to dynamically typed
//! values, like a JSON object but with a binary-friendly value grammar
//! (distinct signed/unsigned integers, raw bytes, millisecond timestamps).
//!
//! ## Structure
//!
//! - `Record` is `BTreeMap<String, Value>`; the sorted map gives the codec a
//!   deterministic byte encoding, which is an implementation convenience
//!   rather than a wire contract
//! - `Value` is the tagged tree of every type the codec can carry
//!
//! ## Example
//!
//! ```ignore
//! let mut rec = Record::new();
//! rec.insert("courier_id".into(), Value::from("c-1042"));
//! rec.insert("lat".into(), Value::Float(37.7749));
//! rec.insert("dispatched".into(), Value::Bool(true));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A schema-less record: string keys mapped to dynamically typed values.
pub type Record = BTreeMap<String, Value>;

/// One dynamically typed value inside a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Bytes),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Millisecond-precision instant.
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// Stringified form used for partition keys.
///
/// Scalars render as their obvious text form; bytes render lossily as UTF-8;
/// composites fall back to their debug form.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::List(_) | Value::Map(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

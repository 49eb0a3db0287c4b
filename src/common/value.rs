// Typed column values and bound statement arguments

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A typed column value as read from, or bound to, the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Date(String),
    Timestamp(String),
    Blob(Vec<u8>),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            DataValue::Null => 0.hash(state),
            DataValue::Integer(i) => { 1.hash(state); i.hash(state); }
            DataValue::Float(f) => { 2.hash(state); f.to_bits().hash(state); }
            DataValue::Text(s) => { 3.hash(state); s.hash(state); }
            DataValue::Boolean(b) => { 4.hash(state); b.hash(state); }
            DataValue::Date(s) => { 5.hash(state); s.hash(state); }
            DataValue::Timestamp(s) => { 6.hash(state); s.hash(state); }
            DataValue::Blob(b) => { 7.hash(state); b.hash(state); }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "{}", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
            DataValue::Date(s) => write!(f, "{}", s),
            DataValue::Timestamp(s) => write!(f, "{}", s),
            DataValue::Blob(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => Some(Ordering::Equal),
            (DataValue::Null, _) => Some(Ordering::Less),
            (_, DataValue::Null) => Some(Ordering::Greater),

            (DataValue::Integer(a), DataValue::Integer(b)) => a.partial_cmp(b),
            (DataValue::Float(a), DataValue::Float(b)) => a.partial_cmp(b),
            (DataValue::Integer(a), DataValue::Float(b)) => (*a as f64).partial_cmp(b),
            (DataValue::Float(a), DataValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (DataValue::Text(a), DataValue::Text(b)) => Some(a.cmp(b)),
            (DataValue::Boolean(a), DataValue::Boolean(b)) => a.partial_cmp(b),
            (DataValue::Date(a), DataValue::Date(b)) => Some(a.cmp(b)),
            (DataValue::Timestamp(a), DataValue::Timestamp(b)) => Some(a.cmp(b)),
            (DataValue::Blob(a), DataValue::Blob(b)) => Some(a.cmp(b)),

            (DataValue::Text(a), DataValue::Date(b)) => Some(a.cmp(b)),
            (DataValue::Date(a), DataValue::Text(b)) => Some(a.cmp(b)),
            (DataValue::Text(a), DataValue::Timestamp(b)) => Some(a.cmp(b)),
            (DataValue::Timestamp(a), DataValue::Text(b)) => Some(a.cmp(b)),

            _ => None,
        }
    }
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Integer view of the value, used for status codes and generated keys
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DataValue::Integer(i) => Some(*i),
            DataValue::Boolean(b) => Some(*b as i64),
            DataValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) | DataValue::Date(s) | DataValue::Timestamp(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of a text or blob value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DataValue::Blob(b) => Some(b),
            DataValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Loose equality used when comparing captured images with live rows:
    /// integers and floats compare numerically, everything else structurally.
    pub fn same_as(&self, other: &DataValue) -> bool {
        match (self, other) {
            (DataValue::Integer(a), DataValue::Float(b)) | (DataValue::Float(b), DataValue::Integer(a)) => {
                (*a as f64) == *b
            }
            (DataValue::Text(a), DataValue::Blob(b)) | (DataValue::Blob(b), DataValue::Text(a)) => {
                a.as_bytes() == b.as_slice()
            }
            _ => self == other,
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Integer(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Integer(v as i64)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Float(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Boolean(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(v: Vec<u8>) -> Self {
        DataValue::Blob(v)
    }
}

/// A bound statement argument, addressed by 1-based ordinal or by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: Option<String>,
    pub ordinal: usize,
    pub value: DataValue,
}

impl NamedValue {
    pub fn new(ordinal: usize, value: impl Into<DataValue>) -> Self {
        Self { name: None, ordinal, value: value.into() }
    }

    pub fn named(name: impl Into<String>, ordinal: usize, value: impl Into<DataValue>) -> Self {
        Self { name: Some(name.into()), ordinal, value: value.into() }
    }
}

/// Turn plain positional values into ordinal-addressed arguments
pub fn values_to_named(values: Vec<DataValue>) -> Vec<NamedValue> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| NamedValue { name: None, ordinal: i + 1, value })
        .collect()
}

/// Strip names and ordinals, keeping argument order
pub fn named_to_values(args: &[NamedValue]) -> Vec<DataValue> {
    args.iter().map(|a| a.value.clone()).collect()
}

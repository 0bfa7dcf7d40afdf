//! Dynamically typed values carried by conditions and section data.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single IV level, data entry or callback result.
///
/// Values are totally ordered so that conditions can be sorted, deduplicated
/// and used as keys. Integers and floats compare numerically with each other;
/// on a numeric tie the integer sorts first so that `Int(1) != Float(1.0)`
/// stays consistent with the ordering.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Missing or null entry.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Free text.
    Text(String),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// Nested mapping (for compound callback results).
    Map(BTreeMap<String, Value>),
}

/// Mapping from names to values; used for conditions and section layers.
pub type Data = BTreeMap<String, Value>;

/// One concrete assignment of values to the IVs of a level.
pub type Condition = Data;

/// Builds a [`Data`] map from `(name, value)` pairs.
pub fn data<K, V, I>(pairs: I) -> Data
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(raw) => Some(*raw),
            _ => None,
        }
    }

    /// Returns the numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(raw) => Some(*raw as f64),
            Value::Float(raw) => Some(*raw),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(flag) => {
                1u8.hash(state);
                flag.hash(state);
            }
            Value::Int(raw) => {
                2u8.hash(state);
                raw.hash(state);
            }
            Value::Float(raw) => {
                3u8.hash(state);
                raw.to_bits().hash(state);
            }
            Value::Text(text) => {
                4u8.hash(state);
                text.hash(state);
            }
            Value::List(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Value::Map(entries) => {
                6u8.hash(state);
                entries.hash(state);
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Int(raw) => write!(f, "{raw}"),
            Value::Float(raw) => write!(f, "{raw}"),
            Value::Text(text) => f.write_str(text),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(raw: i64) -> Self {
        Value::Int(raw)
    }
}

impl From<i32> for Value {
    fn from(raw: i32) -> Self {
        Value::Int(raw as i64)
    }
}

impl From<u32> for Value {
    fn from(raw: u32) -> Self {
        Value::Int(raw as i64)
    }
}

impl From<usize> for Value {
    fn from(raw: usize) -> Self {
        Value::Int(raw as i64)
    }
}

impl From<f64> for Value {
    fn from(raw: f64) -> Self {
        Value::Float(raw)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Data> for Value {
    fn from(entries: Data) -> Self {
        Value::Map(entries)
    }
}

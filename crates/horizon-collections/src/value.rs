//! Field values and record access.
//!
//! Sorters, filters and groupers never index into items directly. They read
//! named fields through a [`FieldReader`], which yields a [`Value`]. Any item
//! type that implements [`Record`] gets a reader for free; other types can
//! supply a closure.
//!
//! # Comparison
//!
//! [`Value::compare`] is the generic comparison used by property sorters. It
//! is a total order:
//!
//! - `Null` (a missing field) sorts before everything else, and two nulls
//!   compare equal
//! - values of different kinds are ordered `Null < Bool < number < String`
//! - integers and floats compare numerically with each other
//! - NaN sorts after every other number, and two NaNs compare equal
//!
//! # Example
//!
//! ```
//! use horizon_collections::value::{Record, Value};
//! use serde_json::json;
//!
//! let record = json!({ "name": "Ada", "data": { "age": 36 } });
//! assert_eq!(record.field("name"), Value::from("Ada"));
//! assert_eq!(record.nested_field("data", "age"), Value::Int(36));
//! assert_eq!(record.field("missing"), Value::Null);
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A dynamically typed field value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value (missing field or explicit null).
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
}

impl Value {
    /// Returns `true` if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for null and for the empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Returns the string slice if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
        }
    }

    /// Generic three-way comparison.
    ///
    /// See the [module documentation](self) for the ordering rules.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) if a.kind_rank() == 2 && b.kind_rank() == 2 => {
                // Mixed int/float, or float/float.
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                match (x.is_nan(), y.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                }
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }

    /// Loose equality used by filters: numbers compare numerically, other
    /// kinds must match exactly.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Renders the value as a group key.
    ///
    /// Returns `None` for `Null`, so the caller can decide which group
    /// missing values fall into. Integral floats render without a fraction.
    pub fn to_group_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Value::Float(n as f64), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            compound => Value::String(compound.to_string()),
        }
    }
}

/// Items whose fields can be read by name.
///
/// Implement this for item types that should work with property-based
/// sorters, groupers and filters.
///
/// # Example
///
/// ```
/// use horizon_collections::value::{Record, Value};
///
/// struct Player {
///     name: String,
///     team: String,
///     score: i64,
/// }
///
/// impl Record for Player {
///     fn field(&self, name: &str) -> Value {
///         match name {
///             "name" => Value::from(self.name.as_str()),
///             "team" => Value::from(self.team.as_str()),
///             "score" => Value::Int(self.score),
///             _ => Value::Null,
///         }
///     }
/// }
/// ```
pub trait Record {
    /// Returns the value of a top-level field, or `Null` if absent.
    fn field(&self, name: &str) -> Value;

    /// Returns the value of a field inside the nested object `root`.
    ///
    /// Types without a nested data object ignore the root.
    fn nested_field(&self, root: &str, name: &str) -> Value {
        let _ = root;
        self.field(name)
    }
}

/// Reads `item[root][name]`, or `item[name]` when no root is given.
pub fn read_field<T: Record + ?Sized>(item: &T, root: Option<&str>, name: &str) -> Value {
    match root {
        Some(root) => item.nested_field(root, name),
        None => item.field(name),
    }
}

/// Closure type for reading a named field (optionally under a root) of an item.
pub type FieldReader<T> = Arc<dyn Fn(&T, Option<&str>, &str) -> Value + Send + Sync>;

/// Returns a [`FieldReader`] backed by the item's [`Record`] implementation.
pub fn record_reader<T: Record + 'static>() -> FieldReader<T> {
    Arc::new(|item: &T, root: Option<&str>, name: &str| read_field(item, root, name))
}

impl Record for serde_json::Value {
    fn field(&self, name: &str) -> Value {
        self.get(name).map(Value::from).unwrap_or_default()
    }

    fn nested_field(&self, root: &str, name: &str) -> Value {
        self.get(root)
            .and_then(|nested| nested.get(name))
            .map(Value::from)
            .unwrap_or_default()
    }
}

impl Record for serde_json::Map<String, serde_json::Value> {
    fn field(&self, name: &str) -> Value {
        self.get(name).map(Value::from).unwrap_or_default()
    }

    fn nested_field(&self, root: &str, name: &str) -> Value {
        self.get(root)
            .and_then(|nested| nested.get(name))
            .map(Value::from)
            .unwrap_or_default()
    }
}

impl Record for HashMap<String, Value> {
    fn field(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }
}

impl Record for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }
}

impl<R: Record + ?Sized> Record for Arc<R> {
    fn field(&self, name: &str) -> Value {
        (**self).field(name)
    }

    fn nested_field(&self, root: &str, name: &str) -> Value {
        (**self).nested_field(root, name)
    }
}

impl<R: Record + ?Sized> Record for Box<R> {
    fn field(&self, name: &str) -> Value {
        (**self).field(name)
    }

    fn nested_field(&self, root: &str, name: &str) -> Value {
        (**self).nested_field(root, name)
    }
}

#![forbid(unsafe_code)]

//! The dynamic value model shared by data objects, expressions and bindings.
//!
//! Composite values ([`ReactiveObject`], [`ObservableArray`]) are reference
//! types: cloning a [`Value`] clones the handle, not the contents. Equality
//! between values is *strict*: primitives compare by value (with `NaN` never
//! equal to itself) and composites compare by identity.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Number};

use crate::collection::ObservableArray;
use crate::object::ReactiveObject;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent / undefined.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ReactiveObject),
    Array(ObservableArray),
}

impl Value {
    /// Build a value tree from JSON. Objects and arrays are created plain
    /// (not yet observed).
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::Str(s.into()),
            serde_json::Value::Array(items) => Self::Array(ObservableArray::from_vec(
                items.into_iter().map(Self::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Self::Object(ReactiveObject::from_pairs(
                map.into_iter().map(|(k, v)| (k, Self::from_json(v))),
            )),
        }
    }

    /// Snapshot this value as JSON without registering any dependency.
    ///
    /// Non-finite numbers become `null`. Cyclic structures are cut at the
    /// point of re-entry.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<usize>) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::Object(obj) => {
                let ptr = obj.ptr_id();
                if seen.contains(&ptr) {
                    return serde_json::Value::Null;
                }
                seen.push(ptr);
                let mut map = Map::new();
                for (key, value) in obj.peek_entries() {
                    map.insert(key.to_string(), value.to_json_inner(seen));
                }
                seen.pop();
                serde_json::Value::Object(map)
            }
            Self::Array(arr) => {
                let ptr = arr.ptr_id();
                if seen.contains(&ptr) {
                    return serde_json::Value::Null;
                }
                seen.push(ptr);
                let items = arr
                    .peek_vec()
                    .iter()
                    .map(|v| v.to_json_inner(seen))
                    .collect();
                seen.pop();
                serde_json::Value::Array(items)
            }
        }
    }

    /// Whether this is an object or array.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness used by conditional guards: `null`, `false`, `0`, `NaN`
    /// and `""` are falsy, everything else (including empty composites) is
    /// truthy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Object(_) | Self::Array(_) => true,
        }
    }

    /// Strict equality: identity for composites, value for primitives.
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Strict equality, except that two `NaN`s count as the same value.
    /// Writes use this to decide whether anything changed.
    #[must_use]
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_eq(other),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ObservableArray> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Tracked member access: object property, array index or array
    /// `length`. Anything else reads as `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Self {
        match self {
            Self::Object(obj) => obj.get(key),
            Self::Array(arr) => {
                if key == "length" {
                    return Self::Number(arr.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|idx| arr.get(idx))
                    .unwrap_or_default()
            }
            _ => Self::Null,
        }
    }

    /// Untracked member access.
    #[must_use]
    pub fn peek(&self, key: &str) -> Self {
        match self {
            Self::Object(obj) => obj.peek(key),
            Self::Array(arr) => {
                if key == "length" {
                    return Self::Number(arr.peek_len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|idx| arr.peek_vec().get(idx).cloned())
                    .unwrap_or_default()
            }
            _ => Self::Null,
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// One-level debug view: composites print as a size summary so cyclic data
/// never recurses.
pub(crate) struct Shallow<'a>(pub(crate) &'a Value);

impl fmt::Debug for Shallow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Object(obj) => write!(f, "{{..{} keys}}", obj.peek_len()),
            Value::Array(arr) => write!(f, "[..{} items]", arr.peek_len()),
            other => other.fmt(f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Object(obj) => obj.fmt(f),
            Self::Array(arr) => arr.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => match number_to_json(*n) {
                serde_json::Value::Number(num) => write!(f, "{num}"),
                _ => write!(f, "{n}"),
            },
            Self::Str(s) => f.write_str(s),
            Self::Object(_) | Self::Array(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<ReactiveObject> for Value {
    fn from(obj: ReactiveObject) -> Self {
        Self::Object(obj)
    }
}

impl From<ObservableArray> for Value {
    fn from(arr: ObservableArray) -> Self {
        Self::Array(arr)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

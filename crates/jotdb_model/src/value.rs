//! Dynamic document value type.

use std::fmt;
use std::sync::Arc;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// An opaque match predicate carried by a `$where` query clause.
///
/// Predicates are compared by identity, never serialized, and are only
/// meaningful inside queries. A document containing one is treated as if
/// the field were undefined.
#[derive(Clone)]
pub struct WherePredicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl WherePredicate {
    /// Wraps a predicate function.
    pub fn new(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluates the predicate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        (self.0)(doc)
    }
}

impl fmt::Debug for WherePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WherePredicate(..)")
    }
}

impl PartialEq for WherePredicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A dynamic document value.
///
/// Documents, queries and update specifications are all expressed as
/// `Value` trees. Object fields keep their insertion order so a document
/// round-trips through the line codec byte-for-byte; field lookup is by
/// name and duplicate keys are not representable through the mutation
/// helpers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A field that exists in memory but is absent from serialized form.
    Undefined,
    /// Null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit floating point number.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Absolute instant with millisecond precision.
    DateTime(EpochMillis),
    /// Array of values.
    Array(Vec<Value>),
    /// Object with insertion-ordered fields.
    Object(Vec<(String, Value)>),
    /// A `$where` predicate. Only valid inside queries.
    Where(WherePredicate),
}

impl Value {
    /// Creates an empty object.
    #[must_use]
    pub fn object() -> Self {
        Value::Object(Vec::new())
    }

    /// Wraps a predicate as a `$where` clause value.
    pub fn where_fn(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Value::Where(WherePredicate::new(f))
    }

    /// Returns true when the value is `Undefined`.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true for objects.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Returns true for arrays.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric payload, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the array elements, if any.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the object fields, if any.
    #[must_use]
    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Looks up a top-level object field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Looks up a top-level object field mutably.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object(fields) => fields.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Sets a top-level object field, replacing any existing value.
    ///
    /// A no-op on non-objects.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Object(fields) = self {
            let key = key.into();
            match fields.iter_mut().find(|(k, _)| *k == key) {
                Some((_, slot)) => *slot = value,
                None => fields.push((key, value)),
            }
        }
    }

    /// Removes a top-level object field, returning its previous value.
    pub fn remove_field(&mut self, key: &str) -> Option<Value> {
        if let Value::Object(fields) = self {
            if let Some(pos) = fields.iter().position(|(k, _)| k == key) {
                return Some(fields.remove(pos).1);
            }
        }
        None
    }

    /// The `_id` field of a document, when it is a string.
    #[must_use]
    pub fn doc_id(&self) -> Option<&str> {
        self.get("_id").and_then(Value::as_str)
    }

    /// Deep copy that drops every field whose name starts with `$` or
    /// contains `.`, at any nesting depth.
    ///
    /// Used when a user-provided body (an upsert seed or a replacement
    /// document) must be accepted with operator keys silently stripped.
    #[must_use]
    pub fn deep_copy_strict(&self) -> Value {
        match self {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .filter(|(k, _)| !k.starts_with('$') && !k.contains('.'))
                    .map(|(k, v)| (k.clone(), v.deep_copy_strict()))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(Value::deep_copy_strict).collect())
            }
            other => other.clone(),
        }
    }

    /// Human-readable kind name, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Where(_) => "predicate",
        }
    }

    /// JavaScript-style truthiness, used by `$exists`.
    ///
    /// The empty string counts as truthy, matching the datastore's
    /// historical `$exists: ""` behavior.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Where(_) => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Vec<(String, Value)>> for Value {
    fn from(fields: Vec<(String, Value)>) -> Self {
        Value::Object(fields)
    }
}

/// Builds a [`Value::Object`] from `key => value` pairs.
///
/// ```
/// use jotdb_model::{doc, Value};
///
/// let d = doc! { "name" => "saturn", "rings" => true };
/// assert_eq!(d.get("name").and_then(Value::as_str), Some("saturn"));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Value::object() };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {
        $crate::Value::Object(vec![
            $( ($key.to_string(), $crate::Value::from($value)) ),+
        ])
    };
}

/// Builds a [`Value::Array`] from elements convertible to [`Value`].
#[macro_export]
macro_rules! array {
    () => { $crate::Value::Array(Vec::new()) };
    ( $( $value:expr ),+ $(,)? ) => {
        $crate::Value::Array(vec![ $( $crate::Value::from($value) ),+ ])
    };
}

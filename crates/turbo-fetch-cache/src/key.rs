//! Request descriptors and cache key derivation.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CacheResult;

/// A canonical cache key derived from a request descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Zero-argument function producing the descriptor value on demand.
///
/// `None` means the value is absent, which derives no key.
pub type Accessor = Arc<dyn Fn() -> Option<Value> + Send + Sync>;

/// Describes a request: either a literal value or an accessor evaluated
/// each time the key is derived.
#[derive(Clone)]
pub enum Descriptor {
    /// A fixed value.
    Literal(Value),
    /// A function producing the value.
    Accessor(Accessor),
}

impl Descriptor {
    /// Create a literal descriptor.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Create an accessor descriptor.
    pub fn accessor<F>(f: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        Self::Accessor(Arc::new(f))
    }

    /// Create a literal descriptor from any serializable value.
    pub fn from_serialize<S: Serialize + ?Sized>(value: &S) -> CacheResult<Self> {
        Ok(Self::Literal(serde_json::to_value(value)?))
    }

    /// Evaluate the descriptor to its underlying value.
    pub fn resolve(&self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Accessor(f) => f(),
        }
    }

    /// Derive the cache key for this descriptor.
    pub fn key(&self) -> Option<CacheKey> {
        derive_key(self)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Accessor(_) => f.write_str("Accessor(..)"),
        }
    }
}

impl From<Value> for Descriptor {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&Descriptor> for Descriptor {
    fn from(descriptor: &Descriptor) -> Self {
        descriptor.clone()
    }
}

impl From<&str> for Descriptor {
    fn from(s: &str) -> Self {
        Self::Literal(Value::String(s.to_string()))
    }
}

impl From<String> for Descriptor {
    fn from(s: String) -> Self {
        Self::Literal(Value::String(s))
    }
}

/// Derive the cache key for a descriptor.
///
/// Returns `None` ("no key") when the descriptor resolves to `false`,
/// `null` or nothing at all; callers must not fetch in that case.
pub fn derive_key(descriptor: &Descriptor) -> Option<CacheKey> {
    key_for_value(&descriptor.resolve()?)
}

/// Derive the cache key for an already-resolved descriptor value.
///
/// Strings are used as-is, numbers and `true` use their display form, and
/// arrays and objects are serialized as JSON with object keys sorted at
/// every level.
///
/// This differs from plain string concatenation in two places: an array
/// keeps its JSON form (`["key"]` gives `["key"]`, not `key`), and a number
/// keeps its JSON form (`1.0` gives `1.0`, not `1`). Keys built from an
/// integer and from the same value written as a float never collide.
pub fn key_for_value(value: &Value) -> Option<CacheKey> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(CacheKey::from("true")),
        Value::String(s) => Some(CacheKey::new(s.clone())),
        Value::Number(n) => Some(CacheKey::new(n.to_string())),
        Value::Array(_) | Value::Object(_) => Some(CacheKey::new(stable_stringify(value))),
    }
}

/// Serialize a value as JSON with object keys sorted lexicographically.
///
/// Two structurally equal values always produce the same string, whatever
/// order their object keys were inserted in.
pub fn stable_stringify(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

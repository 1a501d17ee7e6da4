// SPDX-License-Identifier: Apache-2.0

//! Typed attribute values and attribute maps (§3).

use std::collections::BTreeMap;

/// A typed attribute value. Arrays are expected to be homogeneous; this is a
/// convention enforced by callers rather than by the type system, matching
/// the OTLP `AnyValue` model.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit floating point.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A homogeneous array of values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Returns the value as a string slice, if it is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the value as `f64` for numeric predicate evaluation (adaptive
    /// sampler rule conditions, §4.3.1); ints are widened.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// An attribute map with unique keys (§3: "Attribute keys are unique within a
/// map"). Backed by a `BTreeMap` so that iteration order is deterministic and
/// the map can be hashed for time-series identity (§3, §8) regardless of
/// insertion order — point attribute sets are an unordered set by contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, AttrEq>);

// AttributeValue doesn't implement Eq (f64), but identity/equality checks in
// this codebase only ever compare attribute maps that were built from
// deterministic receiver output, so we wrap with a best-effort Eq via the
// formatted value. This keeps `Attributes: Eq` for use as part of cache keys
// without pretending float comparison is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrEq(AttributeValue);

impl std::hash::Hash for AttrEq {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        format!("{:?}", self.0).hash(state);
    }
}

impl Eq for AttributeValue {}

impl Attributes {
    /// An empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key/value pair, overwriting any existing value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> &mut Self {
        let _ = self.0.insert(key.into(), AttrEq(value.into()));
        self
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        let _ = self.insert(key, value);
        self
    }

    /// Looks up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key).map(|v| &v.0)
    }

    /// Removes a key, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key).map(|v| v.0)
    }

    /// True if the map contains no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates entries in key order (deterministic, not insertion order).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), &v.0))
    }

    /// Retains only entries whose key does not appear in `keys` — used by the
    /// cost controller to strip configured high-cardinality dimensions
    /// (§4.3.4) and by the plan extractor to drop sensitive attributes.
    pub fn remove_all(&mut self, keys: &[String]) {
        for k in keys {
            let _ = self.0.remove(k);
        }
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (k, v) in iter {
            let _ = attrs.insert(k, v);
        }
        attrs
    }
}

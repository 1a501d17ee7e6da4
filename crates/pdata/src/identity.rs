// SPDX-License-Identifier: Apache-2.0

//! Time-series identity: `(resource attrs, scope, metric name, point attrs)`
//! (§3, glossary). Used by the PostgreSQL/MySQL receivers to key their delta
//! caches and by the adaptive sampler's dedup table.

use crate::{AttributeValue, Attributes, Resource};
use std::fmt::Write as _;

/// A deterministic, order-independent identity for a time series.
///
/// Point attributes are treated as an unordered set (§3); since
/// [`Attributes`] is backed by a `BTreeMap`, iteration is already key-sorted
/// and hashing is stable regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesIdentity(String);

impl SeriesIdentity {
    /// Builds an identity from the resource, scope identity, metric name, and
    /// point attributes.
    #[must_use]
    pub fn new(
        resource: &Resource,
        scope_name: &str,
        scope_version: &str,
        metric_name: &str,
        point_attrs: &Attributes,
    ) -> Self {
        let mut buf = String::new();
        write_attrs(&mut buf, resource.attributes());
        let _ = write!(buf, "|scope={scope_name}/{scope_version}|name={metric_name}|");
        write_attrs(&mut buf, point_attrs);
        SeriesIdentity(buf)
    }

    /// The identity as an opaque string, suitable as a cache/map key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_attrs(buf: &mut String, attrs: &Attributes) {
    for (k, v) in attrs.iter() {
        let _ = write!(buf, "{k}={}", format_value(v));
        buf.push(';');
    }
}

fn format_value(v: &AttributeValue) -> String {
    match v {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Double(d) => format!("{d}"),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Bytes(b) => format!("{b:?}"),
        AttributeValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_independent_of_insertion_order() {
        let resource = Resource::new(Attributes::new().with("db.system", "postgresql"));
        let a = Attributes::new().with("db.name", "app").with("host", "h1");
        let b = Attributes::new().with("host", "h1").with("db.name", "app");
        let id_a = SeriesIdentity::new(&resource, "s", "1", "m", &a);
        let id_b = SeriesIdentity::new(&resource, "s", "1", "m", &b);
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn identity_differs_by_metric_name() {
        let resource = Resource::default();
        let attrs = Attributes::new();
        let id_a = SeriesIdentity::new(&resource, "s", "1", "m1", &attrs);
        let id_b = SeriesIdentity::new(&resource, "s", "1", "m2", &attrs);
        assert_ne!(id_a, id_b);
    }
}

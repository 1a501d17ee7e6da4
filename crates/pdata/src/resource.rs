// SPDX-License-Identifier: Apache-2.0

//! Resource and scope containers (§3).

use crate::{AttributeValue, Attributes, PDataError};

/// The producing entity of a `ResourceSet` (e.g. `db.system=postgresql`,
/// `service.name`, `host.name`). Immutable after receiver emission (§3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    /// Builds a resource from an attribute map.
    #[must_use]
    pub fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }

    /// Read-only access to the resource's attributes.
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Convenience accessor, used pervasively by processors keying off
    /// `db.system`/`db.name`/`service.name`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// The identity of the instrumenting library emitting a group of items (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Scope<T> {
    /// Instrumentation scope name, e.g. `dbscope/postgresqlreceiver`.
    pub name: String,
    /// Instrumentation scope version.
    pub version: String,
    /// Ordered sequence of metric/log/span records.
    pub items: Vec<T>,
}

impl<T> Scope<T> {
    /// Creates a new, empty scope.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            items: Vec::new(),
        }
    }

    /// Builder-style: appends an item.
    #[must_use]
    pub fn with_item(mut self, item: T) -> Self {
        self.items.push(item);
        self
    }
}

/// Top-level container for a single source process or target (§3).
///
/// Within one `ResourceSet`, `Scope (name, version)` uniquely groups items;
/// [`ResourceSet::push_scope`] enforces this invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet<T> {
    /// The producing entity.
    pub resource: Resource,
    /// Ordered scope children.
    pub scopes: Vec<Scope<T>>,
}

impl<T> ResourceSet<T> {
    /// Creates a resource set with no scopes.
    #[must_use]
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            scopes: Vec::new(),
        }
    }

    /// Appends a scope, rejecting a duplicate `(name, version)` identity.
    pub fn push_scope(&mut self, scope: Scope<T>) -> Result<(), PDataError> {
        if self
            .scopes
            .iter()
            .any(|s| s.name == scope.name && s.version == scope.version)
        {
            return Err(PDataError::DuplicateScope {
                name: scope.name,
                version: scope.version,
            });
        }
        self.scopes.push(scope);
        Ok(())
    }

    /// Total number of items across all scopes.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.scopes.iter().map(|s| s.items.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_scope_rejected() {
        let mut rs: ResourceSet<u32> = ResourceSet::new(Resource::default());
        rs.push_scope(Scope::new("a", "1")).unwrap();
        let err = rs.push_scope(Scope::new("a", "1")).unwrap_err();
        assert!(matches!(err, PDataError::DuplicateScope { .. }));
    }
}

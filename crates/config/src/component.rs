// SPDX-License-Identifier: Apache-2.0

//! `ComponentID = (type, name?)` (§3).

use std::fmt;

/// The four component kinds that share a lifecycle contract (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// A data source.
    Receiver,
    /// An inline transform.
    Processor,
    /// A data sink.
    Exporter,
    /// A non-pipeline auxiliary component (e.g. an auth provider).
    Extension,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Receiver => "receiver",
            ComponentKind::Processor => "processor",
            ComponentKind::Exporter => "exporter",
            ComponentKind::Extension => "extension",
        };
        write!(f, "{s}")
    }
}

/// Identifies one configured component instance: a `type` (e.g.
/// `postgresql`, `adaptive_sampler`, `otlphttp`) and an optional
/// disambiguating `name` (the part after `/` in `type/name` config keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    /// Component kind.
    pub kind: ComponentKind,
    /// Component type, e.g. `postgresql`.
    pub type_name: String,
    /// Optional disambiguating name.
    pub name: Option<String>,
}

impl ComponentId {
    /// Builds a component id from a kind and a `type[/name]` config key.
    #[must_use]
    pub fn parse(kind: ComponentKind, key: &str) -> Self {
        match key.split_once('/') {
            Some((type_name, name)) => ComponentId {
                kind,
                type_name: type_name.to_string(),
                name: Some(name.to_string()),
            },
            None => ComponentId {
                kind,
                type_name: key.to_string(),
                name: None,
            },
        }
    }

    /// The `type[/name]` rendering used as a config key and as a pipeline
    /// reference.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.name {
            Some(n) => format!("{}/{}", self.type_name, n),
            None => self.type_name.clone(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_and_name() {
        let id = ComponentId::parse(ComponentKind::Receiver, "postgresql/primary");
        assert_eq!(id.type_name, "postgresql");
        assert_eq!(id.name.as_deref(), Some("primary"));
        assert_eq!(id.key(), "postgresql/primary");
    }

    #[test]
    fn parses_type_only() {
        let id = ComponentId::parse(ComponentKind::Exporter, "otlphttp");
        assert_eq!(id.name, None);
        assert_eq!(id.key(), "otlphttp");
    }
}

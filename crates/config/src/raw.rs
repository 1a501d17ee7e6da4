// SPDX-License-Identifier: Apache-2.0

//! The raw, still-untyped-per-component configuration document: top-level
//! keys `receivers`, `processors`, `exporters`, `extensions`, `service`
//! (§6). Each component entry is a `type[/name]`-keyed map of
//! component-specific settings, deserialized as a `serde_yaml::Value` here
//! and re-deserialized into a concrete `Config` struct by the owning crate
//! (receivers-db, processors-db, exporter-otlp) once the component's type
//! is known.

use crate::service::ServiceConfig;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The top-level configuration document.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// `type[/name]` -> component settings.
    #[serde(default)]
    pub receivers: BTreeMap<String, serde_yaml::Value>,
    /// `type[/name]` -> component settings.
    #[serde(default)]
    pub processors: BTreeMap<String, serde_yaml::Value>,
    /// `type[/name]` -> component settings.
    #[serde(default)]
    pub exporters: BTreeMap<String, serde_yaml::Value>,
    /// `type[/name]` -> component settings.
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
    /// The `service:` section; `None` is only valid for `--dry-run` partial
    /// documents that validate component settings without wiring pipelines.
    pub service: Option<ServiceConfig>,
}

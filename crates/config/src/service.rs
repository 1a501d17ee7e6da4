// SPDX-License-Identifier: Apache-2.0

//! `Service = { pipelines, extensions, telemetry }` (§3).

use crate::pipeline::PipelineConfig;
use serde::Deserialize;
use std::collections::BTreeMap;

/// The `service:` top-level config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Pipelines keyed by `signal[/name]`, e.g. `metrics`, `metrics/internal`,
    /// `logs`, `traces` — the prefix before an optional `/` determines the
    /// pipeline's signal type (§3).
    pub pipelines: BTreeMap<String, PipelineConfig>,

    /// Extension component keys started alongside pipelines.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Self-telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// Self-observability configuration: logging level and the admin HTTP
/// server (§6 `/health`, `/metrics`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySettings {
    /// `tracing`/`RUST_LOG`-style filter directive, e.g. `info`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bind address for the admin HTTP server (`/health`, `/metrics`).
    #[serde(default = "default_admin_bind")]
    pub admin_bind_address: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_admin_bind() -> String {
    "127.0.0.1:8888".to_string()
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            admin_bind_address: default_admin_bind(),
        }
    }
}

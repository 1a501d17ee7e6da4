// SPDX-License-Identifier: Apache-2.0

//! Configuration model (§3, §6): component ids, pipelines, the service
//! section, the layered loader, and component graph validation.

mod component;
mod env;
mod error;
mod graph;
mod loader;
mod pipeline;
mod raw;
mod service;

pub use component::{ComponentId, ComponentKind};
pub use env::{resolve_env_refs, resolve_env_refs_process};
pub use error::ConfigError;
pub use graph::{build as build_graph, ComponentGraph, ResolvedPipeline};
pub use loader::load as load_raw;
pub use pipeline::PipelineConfig;
pub use raw::RawConfig;
pub use service::{ServiceConfig, TelemetrySettings};

/// Loads every `--config` source, applies `--set` overrides, resolves
/// environment references, and validates the resulting component graph.
/// This is the single entry point `main.rs` calls for both normal startup
/// and `--dry-run` structural validation (dry-run stops before this
/// returns a graph with live components wired up; that part lives in
/// `dbscope-engine`).
pub fn load(uris: &[String], overrides: &[(String, String)]) -> Result<(RawConfig, ComponentGraph), ConfigError> {
    let raw = load_raw(uris, overrides)?;
    let graph = graph::build(&raw)?;
    Ok((raw, graph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
receivers:
  postgresql:
    endpoint: localhost:5432
exporters:
  otlphttp:
    endpoint: http://localhost:4318
service:
  pipelines:
    metrics:
      receivers: [postgresql]
      exporters: [otlphttp]
"#,
        )
        .unwrap();

        let (_raw, graph) = load(&[format!("file:{}", path.display())], &[]).unwrap();
        assert_eq!(graph.pipelines.len(), 1);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Component graph construction and validation (§4.5, §9).
//!
//! This crate validates what it can see from [`RawConfig`] alone: every
//! pipeline reference resolves to a declared component, every declared
//! component is referenced by at least one pipeline, and a processor chain
//! has no repeated id. Per-component signal support (§4.5(a)) is checked by
//! the engine once components are instantiated from their factories, since
//! that's the only place that knows what signals a given component type
//! actually supports.

use crate::component::{ComponentId, ComponentKind};
use crate::error::ConfigError;
use crate::raw::RawConfig;
use dbscope_pdata::SignalType;
use std::collections::{BTreeMap, BTreeSet};

/// One pipeline fully resolved to typed component ids, in declaration order.
#[derive(Debug, Clone)]
pub struct ResolvedPipeline {
    /// The pipeline's signal type.
    pub signal: SignalType,
    /// Receivers feeding this pipeline.
    pub receivers: Vec<ComponentId>,
    /// The ordered inline processor chain.
    pub processors: Vec<ComponentId>,
    /// Exporters this pipeline ships data to.
    pub exporters: Vec<ComponentId>,
}

/// The fully validated set of pipelines declared by a configuration
/// document, keyed by their `service.pipelines` key (e.g. `metrics`,
/// `metrics/internal`).
#[derive(Debug, Clone, Default)]
pub struct ComponentGraph {
    /// Pipelines keyed by their declaration key.
    pub pipelines: BTreeMap<String, ResolvedPipeline>,
}

fn parse_pipeline_signal(key: &str) -> Result<SignalType, ConfigError> {
    let prefix = key.split('/').next().unwrap_or(key);
    prefix
        .parse::<SignalType>()
        .map_err(|details| ConfigError::InvalidPipelineKey {
            key: key.to_string(),
            details,
        })
}

fn check_references(
    pipeline_key: &str,
    kind: ComponentKind,
    refs: &[String],
    declared: &BTreeMap<String, serde_yaml::Value>,
    seen: &mut BTreeSet<(ComponentKind, String)>,
) -> Result<Vec<ComponentId>, ConfigError> {
    let mut resolved = Vec::with_capacity(refs.len());
    for key in refs {
        if !declared.contains_key(key) {
            return Err(ConfigError::UnknownComponent {
                pipeline: pipeline_key.to_string(),
                kind: kind.label(),
                id: key.clone(),
            });
        }
        let _ = seen.insert((kind, key.clone()));
        resolved.push(ComponentId::parse(kind, key));
    }
    Ok(resolved)
}

impl ComponentKind {
    fn label(self) -> &'static str {
        match self {
            ComponentKind::Receiver => "receiver",
            ComponentKind::Processor => "processor",
            ComponentKind::Exporter => "exporter",
            ComponentKind::Extension => "extension",
        }
    }
}

/// Builds and validates a [`ComponentGraph`] from a raw document.
pub fn build(raw: &RawConfig) -> Result<ComponentGraph, ConfigError> {
    let service = raw.service.as_ref().ok_or(ConfigError::MissingService)?;

    let mut seen: BTreeSet<(ComponentKind, String)> = BTreeSet::new();
    let mut pipelines = BTreeMap::new();

    for (pipeline_key, pipeline) in &service.pipelines {
        let signal = parse_pipeline_signal(pipeline_key)?;

        let receivers = check_references(
            pipeline_key,
            ComponentKind::Receiver,
            &pipeline.receivers,
            &raw.receivers,
            &mut seen,
        )?;
        let processors = check_references(
            pipeline_key,
            ComponentKind::Processor,
            &pipeline.processors,
            &raw.processors,
            &mut seen,
        )?;
        let exporters = check_references(
            pipeline_key,
            ComponentKind::Exporter,
            &pipeline.exporters,
            &raw.exporters,
            &mut seen,
        )?;

        let mut chain_keys = BTreeSet::new();
        for key in &pipeline.processors {
            if !chain_keys.insert(key.clone()) {
                return Err(ConfigError::CycleDetected(pipeline_key.clone()));
            }
        }

        let _ = pipelines.insert(
            pipeline_key.clone(),
            ResolvedPipeline {
                signal,
                receivers,
                processors,
                exporters,
            },
        );
    }

    for (kind, declared) in [
        (ComponentKind::Receiver, &raw.receivers),
        (ComponentKind::Processor, &raw.processors),
        (ComponentKind::Exporter, &raw.exporters),
    ] {
        for key in declared.keys() {
            if !seen.contains(&(kind, key.clone())) {
                return Err(ConfigError::UnreferencedComponent(ComponentId::parse(
                    kind, key,
                )));
            }
        }
    }

    Ok(ComponentGraph { pipelines })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> RawConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn resolves_simple_pipeline() {
        let raw = parse(
            r#"
receivers:
  postgresql: {}
exporters:
  otlphttp: {}
service:
  pipelines:
    metrics:
      receivers: [postgresql]
      exporters: [otlphttp]
"#,
        );
        let graph = build(&raw).unwrap();
        let pipeline = &graph.pipelines["metrics"];
        assert_eq!(pipeline.signal, SignalType::Metrics);
        assert_eq!(pipeline.receivers.len(), 1);
        assert_eq!(pipeline.exporters.len(), 1);
    }

    #[test]
    fn rejects_unreferenced_component() {
        let raw = parse(
            r#"
receivers:
  postgresql: {}
  mysql: {}
exporters:
  otlphttp: {}
service:
  pipelines:
    metrics:
      receivers: [postgresql]
      exporters: [otlphttp]
"#,
        );
        let err = build(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnreferencedComponent(_)));
    }

    #[test]
    fn rejects_unknown_component_reference() {
        let raw = parse(
            r#"
receivers:
  postgresql: {}
exporters:
  otlphttp: {}
service:
  pipelines:
    metrics:
      receivers: [postgresql, ghost]
      exporters: [otlphttp]
"#,
        );
        let err = build(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownComponent { .. }));
    }

    #[test]
    fn rejects_repeated_processor_in_chain() {
        let raw = parse(
            r#"
receivers:
  postgresql: {}
processors:
  adaptive_sampler: {}
exporters:
  otlphttp: {}
service:
  pipelines:
    metrics:
      receivers: [postgresql]
      processors: [adaptive_sampler, adaptive_sampler]
      exporters: [otlphttp]
"#,
        );
        let err = build(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected(_)));
    }

    #[test]
    fn rejects_invalid_pipeline_key() {
        let raw = parse(
            r#"
receivers:
  postgresql: {}
exporters:
  otlphttp: {}
service:
  pipelines:
    bogus:
      receivers: [postgresql]
      exporters: [otlphttp]
"#,
        );
        let err = build(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPipelineKey { .. }));
    }

    #[test]
    fn missing_service_is_an_error() {
        let raw = parse("receivers: {}\n");
        let err = build(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingService));
    }
}

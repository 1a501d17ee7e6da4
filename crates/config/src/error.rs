// SPDX-License-Identifier: Apache-2.0

//! Configuration errors (§7: "Configuration error — structural or semantic;
//! fatal at startup, reported with path").

use crate::ComponentId;

/// All errors that can occur while loading, resolving, or validating the
/// configuration graph.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A configured URI could not be read.
    #[error("failed to read config source {uri}: {details}")]
    SourceReadError {
        /// The URI that failed to load.
        uri: String,
        /// Underlying error description.
        details: String,
    },

    /// A document failed to parse as YAML.
    #[error("failed to parse config document: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `--set key=value` override had an invalid path or value.
    #[error("invalid override `{key}={value}`: {details}")]
    InvalidOverride {
        /// The override key.
        key: String,
        /// The override value.
        value: String,
        /// Why it was rejected.
        details: String,
    },

    /// An `${env:NAME}` reference had no default and was not set in the
    /// process environment.
    #[error("unresolved required environment reference: ${{env:{name}}}")]
    UnresolvedEnvVar {
        /// The referenced variable name.
        name: String,
    },

    /// A component id appeared twice under the same component kind.
    #[error("duplicate component id: {0}")]
    DuplicateComponent(ComponentId),

    /// A pipeline referenced a component id not declared in its section.
    #[error("pipeline {pipeline} references unknown {kind} component {id}")]
    UnknownComponent {
        /// The pipeline that referenced the unknown component.
        pipeline: String,
        /// The component kind (receiver/processor/exporter).
        kind: &'static str,
        /// The unknown id.
        id: String,
    },

    /// A declared component was never referenced by any pipeline (§4.5(c)).
    #[error("component {0} is declared but not referenced by any pipeline")]
    UnreferencedComponent(ComponentId),

    /// A receiver/exporter's declared signal did not match the pipeline's
    /// signal (§4.5(a)).
    #[error(
        "signal mismatch in pipeline {pipeline}: component {component} supports {supported} but pipeline is {expected}"
    )]
    SignalMismatch {
        /// The pipeline in which the mismatch occurred.
        pipeline: String,
        /// The offending component.
        component: ComponentId,
        /// The signal(s) the component supports.
        supported: String,
        /// The pipeline's configured signal.
        expected: String,
    },

    /// A cycle was detected among processor references (§4.5(b)). The core
    /// component graph is a DAG by construction (§9); this only fires for
    /// malformed configs that alias a processor to itself through fan-out
    /// references.
    #[error("cycle detected in pipeline {0}")]
    CycleDetected(String),

    /// A `SELECT`-only SQL query receiver was configured with a
    /// non-read-only statement (§4.2, end-to-end scenario 4).
    #[error("query for {component} is rejected: read-only SELECT required")]
    NonReadOnlyQuery {
        /// The offending component.
        component: ComponentId,
    },

    /// `service:` was absent from a document that requires pipeline
    /// validation (i.e. anything but `--dry-run` component-only checks).
    #[error("configuration has no `service` section")]
    MissingService,

    /// A `service.pipelines` key did not parse as `signal[/name]`.
    #[error("invalid pipeline key `{key}`: {details}")]
    InvalidPipelineKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        details: String,
    },
}

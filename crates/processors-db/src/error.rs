// SPDX-License-Identifier: Apache-2.0

//! Configuration errors shared by the database processors.

/// Errors raised while configuring a database processor.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The component's YAML settings failed to deserialize.
    #[error("invalid processor configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A configured pattern (rule condition, PII matcher) failed to compile.
    #[error("invalid regex in processor configuration: {0}")]
    Regex(#[from] regex::Error),

    /// Registering a self-metric with the telemetry registry failed (name
    /// collision with an incompatible metric, most likely).
    #[error("failed to register processor metric: {0}")]
    Telemetry(#[from] dbscope_telemetry::TelemetryError),
}

impl Error {
    /// Wraps this error as an engine-level processor failure attributed to
    /// `node`, classified as `kind`. Used for failures discovered once the
    /// processor is running, where a `NodeId` is available.
    #[must_use]
    pub fn into_engine_error(
        self,
        node: dbscope_engine::NodeId,
        kind: dbscope_engine::ProcessorErrorKind,
    ) -> dbscope_engine::Error {
        dbscope_engine::Error::Processor {
            processor: node,
            kind,
            message: self.to_string(),
        }
    }
}

/// Registry factories build components before a `NodeId` is assigned, so a
/// construction-time failure has nowhere to attach a processor identity and
/// is reported as a configuration error instead (mirrors
/// `dbscope-receivers-db::error::Error`).
impl From<Error> for dbscope_engine::Error {
    fn from(err: Error) -> Self {
        use serde::de::Error as _;
        let message = err.to_string();
        let parse_err = match err {
            Error::Config(e) => e,
            Error::Regex(_) | Error::Telemetry(_) => serde_yaml::Error::custom(message),
        };
        dbscope_engine::Error::Config(dbscope_config::ConfigError::ParseError(parse_err))
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Configuration errors for the OTLP exporter.

/// Errors raised while configuring the OTLP exporter.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The component's YAML settings failed to deserialize.
    #[error("invalid exporter configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The configured endpoint is not a valid URL.
    #[error("invalid exporter endpoint: {0}")]
    Endpoint(#[from] reqwest::Error),
}

/// Registry factories build components before a `NodeId` is assigned, and
/// `Exporter::export`/`shutdown` are never given one either (there is no
/// downstream node to attribute a send failure to) so every
/// construction-time failure is reported as a configuration error, mirroring
/// `dbscope-receivers-db::error::Error` and `dbscope-processors-db::error::Error`.
/// Runtime send failures never reach this conversion: they are reported
/// through `ConsumeOutcome::RetryableError`/`PermanentError` instead (§9).
impl From<Error> for dbscope_engine::Error {
    fn from(err: Error) -> Self {
        use serde::de::Error as _;
        let message = err.to_string();
        let parse_err = match err {
            Error::Config(e) => e,
            Error::Endpoint(_) => serde_yaml::Error::custom(message),
        };
        dbscope_engine::Error::Config(dbscope_config::ConfigError::ParseError(parse_err))
    }
}

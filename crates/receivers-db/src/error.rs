// SPDX-License-Identifier: Apache-2.0

//! Configuration and connection errors shared by the database receivers.

/// Errors raised while configuring or running a database receiver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The component's YAML settings failed to deserialize.
    #[error("invalid receiver configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// The PostgreSQL driver rejected the connection or a query.
    #[error("postgresql error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// The MySQL driver rejected the connection or a query.
    #[error("mysql error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// A checkpoint read/write failed.
    #[error("checkpoint storage error: {0}")]
    Storage(#[from] dbscope_storage::StorageError),
}

impl Error {
    /// Wraps this error as an engine-level receiver failure attributed to
    /// `node`, classified as `kind`. Used for failures discovered once the
    /// receiver is running (connect/scrape), where a `NodeId` is available.
    #[must_use]
    pub fn into_engine_error(
        self,
        node: dbscope_engine::NodeId,
        kind: dbscope_engine::ReceiverErrorKind,
    ) -> dbscope_engine::Error {
        dbscope_engine::Error::Receiver {
            receiver: node,
            kind,
            message: self.to_string(),
        }
    }
}

/// Registry factories build components before a `NodeId` is assigned, so a
/// construction-time failure (bad YAML settings, a non-read-only query) has
/// nowhere to attach a receiver identity and is reported as a configuration
/// error instead.
impl From<Error> for dbscope_engine::Error {
    fn from(err: Error) -> Self {
        use serde::de::Error as _;
        let parse_err = match err {
            Error::Config(e) => e,
            other => serde_yaml::Error::custom(other.to_string()),
        };
        dbscope_engine::Error::Config(dbscope_config::ConfigError::ParseError(parse_err))
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline runtime.

use crate::node::NodeId;
use std::fmt;

/// High-level classification for receiver failures (§7).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReceiverErrorKind {
    /// Could not connect to or authenticate against the monitored system.
    Connect,
    /// Invalid or incomplete configuration detected at runtime.
    Configuration,
    /// Errors scraping or decoding telemetry after the receiver started.
    Transport,
    /// Errors raised while shutting down.
    Shutdown,
    /// Catch-all.
    Other,
}

impl fmt::Display for ReceiverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReceiverErrorKind::Connect => "connect",
            ReceiverErrorKind::Configuration => "configuration",
            ReceiverErrorKind::Transport => "transport",
            ReceiverErrorKind::Shutdown => "shutdown",
            ReceiverErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// High-level classification for processor failures (§7).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessorErrorKind {
    /// Invalid or incomplete configuration.
    Configuration,
    /// Errors encountered while transforming pdata.
    Transport,
    /// Errors raised while shutting down.
    Shutdown,
    /// Catch-all.
    Other,
}

impl fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorErrorKind::Configuration => "configuration",
            ProcessorErrorKind::Transport => "transport",
            ProcessorErrorKind::Shutdown => "shutdown",
            ProcessorErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// High-level classification for exporter failures (§7).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExporterErrorKind {
    /// Could not connect to the OTLP endpoint.
    Connect,
    /// Invalid or incomplete configuration.
    Configuration,
    /// Errors transporting payloads after the exporter started.
    Transport,
    /// Errors raised while shutting down.
    Shutdown,
    /// Catch-all.
    Other,
}

impl fmt::Display for ExporterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExporterErrorKind::Connect => "connect",
            ExporterErrorKind::Configuration => "configuration",
            ExporterErrorKind::Transport => "transport",
            ExporterErrorKind::Shutdown => "shutdown",
            ExporterErrorKind::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// All errors that can occur in the pipeline runtime.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A configuration error surfaced while building the graph.
    #[error("configuration error: {0}")]
    Config(#[from] dbscope_config::ConfigError),

    /// A data channel send failed (the receiving node has shut down).
    #[error("channel closed sending to node {node}")]
    ChannelClosed {
        /// The node that could not be reached.
        node: NodeId,
    },

    /// No default out port is wired for a node with multiple out ports.
    #[error("node {node} has no default out port and none was specified")]
    NoDefaultOutPort {
        /// The offending node.
        node: NodeId,
    },

    /// A receiver failed.
    #[error("receiver {receiver} failed ({kind}): {message}")]
    Receiver {
        /// The failing receiver.
        receiver: NodeId,
        /// Failure classification.
        kind: ReceiverErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// A processor failed.
    #[error("processor {processor} failed ({kind}): {message}")]
    Processor {
        /// The failing processor.
        processor: NodeId,
        /// Failure classification.
        kind: ProcessorErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// An exporter failed.
    #[error("exporter {exporter} failed ({kind}): {message}")]
    Exporter {
        /// The failing exporter.
        exporter: NodeId,
        /// Failure classification.
        kind: ExporterErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// A component type referenced in configuration has no registered factory.
    #[error("no factory registered for {kind} type `{type_name}`")]
    UnknownComponentType {
        /// `receiver` | `processor` | `exporter`.
        kind: &'static str,
        /// The unregistered type name.
        type_name: String,
    },

    /// The pipeline did not fully drain within its shutdown deadline.
    #[error("pipeline {pipeline} did not drain within the shutdown deadline")]
    ShutdownDeadlineExceeded {
        /// The pipeline that failed to drain.
        pipeline: String,
    },
}

// SPDX-License-Identifier: Apache-2.0

//! The pipeline runtime (§9): component traits, the consumer contract, fan
//! out, the component factory registry, pipeline construction from a
//! validated configuration graph, and the service supervisor that drives
//! startup and graceful shutdown.

mod component;
mod consumer;
mod control;
mod error;
mod fanout;
mod message;
mod node;
mod pipeline;
mod registry;
mod supervisor;

pub use component::{EffectHandler, Exporter, Processor, Receiver, TerminalState};
pub use consumer::{merge_fanout_outcomes, ConsumeOutcome};
pub use control::{ControlChannel, NodeControlMsg};
pub use error::{Error, ExporterErrorKind, ProcessorErrorKind, ReceiverErrorKind};
pub use fanout::FanOutExporter;
pub use node::{NodeId, NodeType};
pub use registry::{ExporterFactory, ProcessorFactory, ReceiverFactory, Registry};
pub use supervisor::Service;

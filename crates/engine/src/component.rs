// SPDX-License-Identifier: Apache-2.0

//! The three component traits every pipeline node implements, and the
//! effect handler each one uses to talk back to the runtime.
//!
//! # Lifecycle
//!
//! A node is instantiated by its factory, started via `start`, and runs
//! until it observes a [`NodeControlMsg::Shutdown`] on its control channel
//! or its upstream channel closes. Receivers additionally react to
//! [`NodeControlMsg::TimerTick`] to drive scrape scheduling.

use crate::control::ControlChannel;
use crate::error::Error;
use crate::message::Sender;
use crate::node::NodeId;
use async_trait::async_trait;
use dbscope_pdata::AnyBatch;
use std::collections::HashMap;

/// How a node finished running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// The node drained and stopped in response to a shutdown request.
    Stopped,
    /// The node's upstream closed (channel drop, end of input) with no
    /// shutdown request in flight.
    Exhausted,
}

/// Effect handler shared by receivers and processors: the means by which a
/// node sends pdata downstream. Exporters don't get one since they have no
/// downstream to send to.
#[derive(Clone)]
pub struct EffectHandler {
    node_id: NodeId,
    default_sender: Option<Sender<AnyBatch>>,
    named_senders: HashMap<String, Sender<AnyBatch>>,
}

impl EffectHandler {
    /// Builds an effect handler for a node with a single default downstream
    /// and zero or more additionally-named fan-out siblings (used when a
    /// processor output also needs to reach, e.g., a side pipeline).
    #[must_use]
    pub fn new(
        node_id: NodeId,
        default_sender: Option<Sender<AnyBatch>>,
        named_senders: HashMap<String, Sender<AnyBatch>>,
    ) -> Self {
        Self {
            node_id,
            default_sender,
            named_senders,
        }
    }

    /// The id of the node this handler belongs to.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Sends a batch to the default downstream, awaiting if it's full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDefaultOutPort`] if no default is wired, or
    /// [`Error::ChannelClosed`] if the downstream has shut down.
    pub async fn send(&self, data: AnyBatch) -> Result<(), Error> {
        match &self.default_sender {
            Some(sender) => sender.send(data).await,
            None => Err(Error::NoDefaultOutPort {
                node: self.node_id.clone(),
            }),
        }
    }

    /// Sends to every wired downstream (default plus named siblings),
    /// cloning the batch for each. Used by fan-out nodes.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; callers that need per-sibling
    /// outcomes should use [`crate::consumer::merge_fanout_outcomes`]
    /// instead of this convenience method.
    pub async fn broadcast(&self, data: AnyBatch) -> Result<(), Error> {
        if let Some(sender) = &self.default_sender {
            sender.send(data.clone()).await?;
        }
        for sender in self.named_senders.values() {
            sender.send(data.clone()).await?;
        }
        Ok(())
    }
}

/// A data source: scrapes or listens for telemetry from an external system
/// and converts it into pdata.
#[async_trait]
pub trait Receiver: Send {
    /// Runs until shut down, emitting batches via `effect_handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Receiver`] on an unrecoverable failure.
    async fn start(
        &mut self,
        ctrl: ControlChannel,
        effect_handler: EffectHandler,
    ) -> Result<TerminalState, Error>;
}

/// An inline transform applied to pdata flowing through a pipeline.
#[async_trait]
pub trait Processor: Send {
    /// Transforms one incoming batch, optionally sending zero or more
    /// batches downstream via `effect_handler`, and returns the consumer
    /// outcome for the original batch (§9's consumer contract).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processor`] on an unrecoverable (non-data) failure.
    async fn process(
        &mut self,
        data: AnyBatch,
        effect_handler: &EffectHandler,
    ) -> Result<crate::consumer::ConsumeOutcome, Error>;

    /// Reacts to a non-data control message (e.g. a timer tick driving a
    /// flush). The default implementation ignores every message.
    async fn control(&mut self, _msg: crate::control::NodeControlMsg) -> Result<(), Error> {
        Ok(())
    }
}

/// A data sink: ships pdata to an external destination (or, for a test
/// double, simply records it).
#[async_trait]
pub trait Exporter: Send {
    /// Accepts one batch for export and returns the outcome per the
    /// consumer contract (§9).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exporter`] on an unrecoverable (non-data) failure.
    async fn export(&mut self, data: AnyBatch) -> Result<crate::consumer::ConsumeOutcome, Error>;

    /// Flushes any buffered state and releases resources. Called once after
    /// the exporter's upstream has drained.
    async fn shutdown(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

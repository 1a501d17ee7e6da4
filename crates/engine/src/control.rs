// SPDX-License-Identifier: Apache-2.0

//! Control messages exchanged between the service supervisor and running
//! nodes: timer ticks and graceful shutdown requests.

use crate::node::{NodeId, NodeType};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// A control message sent by the supervisor to a node.
#[derive(Debug, Clone)]
pub enum NodeControlMsg {
    /// A receiver's scrape/scan interval elapsed.
    TimerTick,
    /// Requests a graceful shutdown; the node should finish in-flight work
    /// and release resources by `deadline`. A zero deadline means shut down
    /// immediately without draining.
    Shutdown {
        /// How long the node has to drain before it is forced to stop.
        deadline: Duration,
        /// Human-readable reason, surfaced in logs.
        reason: String,
    },
}

impl NodeControlMsg {
    /// True if this message requests shutdown.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, NodeControlMsg::Shutdown { .. })
    }
}

/// The receiving half of a node's control channel.
pub struct ControlChannel {
    rx: mpsc::Receiver<NodeControlMsg>,
}

impl ControlChannel {
    /// Wraps a receiver half.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<NodeControlMsg>) -> Self {
        Self { rx }
    }

    /// Awaits the next control message. Returns `None` once the supervisor
    /// has dropped its sender (implies an unconditional shutdown).
    pub async fn recv(&mut self) -> Option<NodeControlMsg> {
        self.rx.recv().await
    }
}

/// Registry of every node's control-message sender, used by the supervisor
/// to broadcast timer ticks and shutdown requests in the correct order.
#[derive(Default)]
pub struct ControlSenders {
    senders: HashMap<NodeId, (NodeType, mpsc::Sender<NodeControlMsg>)>,
}

impl ControlSenders {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node's control sender.
    pub fn register(&mut self, node_id: NodeId, node_type: NodeType, sender: mpsc::Sender<NodeControlMsg>) {
        let _ = self.senders.insert(node_id, (node_type, sender));
    }

    /// Broadcasts `Shutdown` to every node of the given type. Individual
    /// send failures (the node already exited) are swallowed; shutdown is
    /// best-effort by design since a dead node doesn't need telling twice.
    pub async fn shutdown_nodes(&self, node_type: NodeType, deadline: Duration, reason: &str) {
        for (kind, sender) in self.senders.values() {
            if *kind != node_type {
                continue;
            }
            let _ = sender
                .send(NodeControlMsg::Shutdown {
                    deadline,
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Broadcasts `TimerTick` to every node of the given type.
    pub async fn tick_nodes(&self, node_type: NodeType) {
        for (kind, sender) in self.senders.values() {
            if *kind != node_type {
                continue;
            }
            let _ = sender.send(NodeControlMsg::TimerTick).await;
        }
    }
}

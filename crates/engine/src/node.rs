// SPDX-License-Identifier: Apache-2.0

//! Node identity shared by receivers, processors, and exporters.

use dbscope_config::ComponentId;
use std::fmt;

/// Identifies a single node in the running pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(ComponentId);

impl NodeId {
    /// Wraps a resolved component id as a node id.
    #[must_use]
    pub fn new(id: ComponentId) -> Self {
        Self(id)
    }

    /// The underlying component id.
    #[must_use]
    pub fn component_id(&self) -> &ComponentId {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies which role a node plays, used to order startup/shutdown and
/// to filter control-message broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// A data source.
    Receiver,
    /// An inline transform.
    Processor,
    /// A data sink.
    Exporter,
}

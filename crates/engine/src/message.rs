// SPDX-License-Identifier: Apache-2.0

//! The pdata channel: a thin wrapper over `tokio::sync::mpsc` so node code
//! talks in terms of [`crate::error::Error`] instead of raw channel errors.

use crate::error::Error;
use crate::node::NodeId;
use tokio::sync::mpsc;

/// The sending half of a pdata channel bound to a specific downstream node.
#[derive(Clone)]
pub struct Sender<PData> {
    to: NodeId,
    inner: mpsc::Sender<PData>,
}

impl<PData> Sender<PData> {
    /// Wraps a raw `mpsc::Sender`, tagging it with the downstream node's id
    /// for error messages.
    #[must_use]
    pub fn new(to: NodeId, inner: mpsc::Sender<PData>) -> Self {
        Self { to, inner }
    }

    /// Sends a message, awaiting if the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the receiving node has shut down.
    pub async fn send(&self, data: PData) -> Result<(), Error> {
        self.inner
            .send(data)
            .await
            .map_err(|_| Error::ChannelClosed { node: self.to.clone() })
    }

    /// Sends without awaiting; fails immediately if the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] both when the channel is closed and
    /// when it's merely full (backpressure), since a node normally responds
    /// to both the same way: apply a [`crate::consumer::ConsumeOutcome::RetryableError`].
    pub fn try_send(&self, data: PData) -> Result<(), Error> {
        self.inner
            .try_send(data)
            .map_err(|_| Error::ChannelClosed { node: self.to.clone() })
    }
}

/// The receiving half of a pdata channel.
pub struct Receiver<PData> {
    inner: mpsc::Receiver<PData>,
}

impl<PData> Receiver<PData> {
    /// Wraps a raw `mpsc::Receiver`.
    #[must_use]
    pub fn new(inner: mpsc::Receiver<PData>) -> Self {
        Self { inner }
    }

    /// Awaits the next message, or `None` once every sender has dropped.
    pub async fn recv(&mut self) -> Option<PData> {
        self.inner.recv().await
    }
}

/// Creates a bounded pdata channel between two nodes.
#[must_use]
pub fn channel<PData>(to: NodeId, capacity: usize) -> (Sender<PData>, Receiver<PData>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Sender::new(to, tx), Receiver::new(rx))
}

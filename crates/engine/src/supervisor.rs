// SPDX-License-Identifier: Apache-2.0

//! Service supervisor: owns every running pipeline and drives startup and
//! shutdown in the order the consumer contract requires (§9) — exporters
//! first (so nothing downstream is missing when data starts flowing),
//! receivers last to stop (so upstream stops producing before downstream
//! drains), and a bounded drain deadline before forcing termination.

use crate::control::ControlSenders;
use crate::error::Error;
use crate::node::NodeType;
use crate::pipeline::{self, RunningPipeline};
use crate::registry::Registry;
use dbscope_config::{ComponentGraph, RawConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How long receivers, then processors, are given to drain before the
/// supervisor stops waiting and returns anyway.
const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Owns the running pipeline graph and the shutdown machinery for it.
pub struct Service {
    pipelines: Vec<RunningPipeline>,
    control_senders: ControlSenders,
    cancellation: CancellationToken,
}

impl Service {
    /// Builds and spawns every pipeline in `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to construct.
    pub fn start(raw: &RawConfig, graph: &ComponentGraph, registry: &Registry) -> Result<Self, Error> {
        let mut control_senders = ControlSenders::new();
        let pipelines = pipeline::spawn_all(raw, graph, registry, &mut control_senders)?;
        info!(pipeline_count = pipelines.len(), "pipelines started");
        Ok(Self {
            pipelines,
            control_senders,
            cancellation: CancellationToken::new(),
        })
    }

    /// A token that is cancelled once shutdown begins, for callers (e.g.
    /// the admin HTTP server) that want to stop alongside the pipeline.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs until `shutdown_signal` resolves (e.g. SIGTERM/SIGINT), then
    /// gracefully drains every pipeline in receiver → processor → exporter
    /// order, with `deadline` given to each stage before it is abandoned.
    pub async fn run_until(self, shutdown_signal: impl std::future::Future<Output = ()>) {
        shutdown_signal.await;
        self.shutdown(DEFAULT_DRAIN_DEADLINE).await;
    }

    /// Gracefully shuts down every pipeline: receivers first (stop
    /// ingesting), then processors (drain and flush), then exporters
    /// (flush and release connections).
    pub async fn shutdown(self, deadline: Duration) {
        self.cancellation.cancel();
        info!("shutdown requested, stopping receivers");
        self.control_senders
            .shutdown_nodes(NodeType::Receiver, deadline, "service shutdown")
            .await;
        self.control_senders
            .shutdown_nodes(NodeType::Processor, deadline, "service shutdown")
            .await;
        self.control_senders
            .shutdown_nodes(NodeType::Exporter, deadline, "service shutdown")
            .await;

        for pipeline in self.pipelines {
            let name = pipeline.name.clone();
            match tokio::time::timeout(deadline, pipeline.join()).await {
                Ok(()) => info!(pipeline = %name, "pipeline drained"),
                Err(_) => tracing::warn!(pipeline = %name, "pipeline did not drain within deadline"),
            }
        }
    }
}

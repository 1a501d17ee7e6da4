// SPDX-License-Identifier: Apache-2.0

//! Builds running pipelines from a validated [`dbscope_config::ComponentGraph`]
//! plus a component [`Registry`], and drives the receiver/processor/exporter
//! loops as spawned tasks wired together with bounded pdata channels.

use crate::component::{EffectHandler, Exporter, Processor, Receiver, TerminalState};
use crate::consumer::ConsumeOutcome;
use crate::control::{ControlChannel, ControlSenders, NodeControlMsg};
use crate::error::Error;
use crate::message;
use crate::node::{NodeId, NodeType};
use crate::registry::Registry;
use dbscope_config::{ComponentGraph, ComponentId, ComponentKind, RawConfig};
use dbscope_pdata::AnyBatch;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Channel capacity for pdata links between pipeline stages. Deliberately
/// small: backpressure should surface quickly rather than let a slow
/// exporter accumulate an unbounded memory footprint.
const CHANNEL_CAPACITY: usize = 64;

/// A single running pipeline: the spawned receiver/processor/exporter
/// tasks and the handle needed to await their completion.
pub struct RunningPipeline {
    /// The pipeline's declaration key (e.g. `metrics`, `logs/ash`).
    pub name: String,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningPipeline {
    /// Awaits every task in this pipeline to completion. Used by the
    /// supervisor after it has broadcast shutdown to confirm the pipeline
    /// actually drained.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(pipeline = %self.name, error = %err, "pipeline task panicked");
            }
        }
    }
}

/// Builds and spawns every pipeline declared in `graph`, registering each
/// node's control sender into `control_senders` so the supervisor can
/// broadcast timer ticks and shutdown requests.
///
/// # Errors
///
/// Returns an error if a referenced component type has no registered
/// factory, or if its settings fail to deserialize.
pub fn spawn_all(
    raw: &RawConfig,
    graph: &ComponentGraph,
    registry: &Registry,
    control_senders: &mut ControlSenders,
) -> Result<Vec<RunningPipeline>, Error> {
    let mut pipelines = Vec::with_capacity(graph.pipelines.len());
    for (name, pipeline) in &graph.pipelines {
        pipelines.push(spawn_pipeline(name, pipeline, raw, registry, control_senders)?);
    }
    Ok(pipelines)
}

fn settings_for<'a>(raw: &'a RawConfig, id: &ComponentId) -> &'a serde_yaml::Value {
    let map = match id.kind {
        ComponentKind::Receiver => &raw.receivers,
        ComponentKind::Processor => &raw.processors,
        ComponentKind::Exporter => &raw.exporters,
        ComponentKind::Extension => &raw.extensions,
    };
    static NULL: serde_yaml::Value = serde_yaml::Value::Null;
    map.get(&id.key()).unwrap_or(&NULL)
}

fn spawn_pipeline(
    name: &str,
    pipeline: &dbscope_config::ResolvedPipeline,
    raw: &RawConfig,
    registry: &Registry,
    control_senders: &mut ControlSenders,
) -> Result<RunningPipeline, Error> {
    let mut tasks = Vec::new();

    let exporters = pipeline
        .exporters
        .iter()
        .map(|id| registry.build_exporter(&id.type_name, settings_for(raw, id)))
        .collect::<Result<Vec<_>, _>>()?;
    let exporter_node = NodeId::new(ComponentId {
        kind: ComponentKind::Exporter,
        type_name: format!("{name}-exporter-stage"),
        name: None,
    });
    let exporter: Box<dyn Exporter> = if exporters.len() == 1 {
        exporters.into_iter().next().expect("len checked")
    } else {
        Box::new(crate::fanout::FanOutExporter::new(exporters))
    };
    let (exporter_ctrl_tx, exporter_ctrl_rx) = tokio::sync::mpsc::channel(8);
    control_senders.register(exporter_node.clone(), NodeType::Exporter, exporter_ctrl_tx);
    let (stage_tx, stage_rx) = message::channel::<AnyBatch>(exporter_node.clone(), CHANNEL_CAPACITY);
    tasks.push(tokio::spawn(run_exporter(
        name.to_string(),
        exporter,
        stage_rx,
        ControlChannel::new(exporter_ctrl_rx),
    )));

    // Processor chain: each stage forwards into the next via a fresh
    // channel; the last stage forwards into the exporter fan-out above.
    let mut next_sender = stage_tx;
    for proc_id in pipeline.processors.iter().rev() {
        let processor = registry.build_processor(&proc_id.type_name, settings_for(raw, proc_id))?;
        let node_id = NodeId::new(proc_id.clone());
        let (proc_ctrl_tx, proc_ctrl_rx) = tokio::sync::mpsc::channel(8);
        control_senders.register(node_id.clone(), NodeType::Processor, proc_ctrl_tx);
        let (in_tx, in_rx) = message::channel::<AnyBatch>(node_id.clone(), CHANNEL_CAPACITY);
        let effect_handler = EffectHandler::new(node_id.clone(), Some(next_sender), HashMap::new());
        tasks.push(tokio::spawn(run_processor(
            node_id.to_string(),
            processor,
            in_rx,
            effect_handler,
            ControlChannel::new(proc_ctrl_rx),
        )));
        next_sender = in_tx;
    }

    // Receivers: every receiver in this pipeline sends into the head of the
    // processor chain (or straight to the exporter stage if there is none).
    for recv_id in &pipeline.receivers {
        let receiver = registry.build_receiver(&recv_id.type_name, settings_for(raw, recv_id))?;
        let node_id = NodeId::new(recv_id.clone());
        let (recv_ctrl_tx, recv_ctrl_rx) = tokio::sync::mpsc::channel(8);
        control_senders.register(node_id.clone(), NodeType::Receiver, recv_ctrl_tx);
        let effect_handler = EffectHandler::new(node_id.clone(), Some(next_sender.clone()), HashMap::new());
        tasks.push(tokio::spawn(run_receiver(
            node_id.to_string(),
            receiver,
            effect_handler,
            ControlChannel::new(recv_ctrl_rx),
        )));
    }

    Ok(RunningPipeline {
        name: name.to_string(),
        tasks,
    })
}

async fn run_receiver(
    node_name: String,
    mut receiver: Box<dyn Receiver>,
    effect_handler: EffectHandler,
    ctrl: ControlChannel,
) {
    match receiver.start(ctrl, effect_handler).await {
        Ok(TerminalState::Stopped) => info!(node = %node_name, "receiver stopped"),
        Ok(TerminalState::Exhausted) => info!(node = %node_name, "receiver exhausted"),
        Err(err) => warn!(node = %node_name, error = %err, "receiver failed"),
    }
}

async fn run_processor(
    node_name: String,
    mut processor: Box<dyn Processor>,
    mut upstream: message::Receiver<AnyBatch>,
    effect_handler: EffectHandler,
    mut ctrl: ControlChannel,
) {
    loop {
        tokio::select! {
            biased;
            msg = ctrl.recv() => {
                match msg {
                    Some(NodeControlMsg::Shutdown { .. }) | None => break,
                    Some(other) => {
                        if let Err(err) = processor.control(other).await {
                            warn!(node = %node_name, error = %err, "processor control handler failed");
                        }
                    }
                }
            }
            data = upstream.recv() => {
                match data {
                    Some(batch) => {
                        match processor.process(batch, &effect_handler).await {
                            Ok(ConsumeOutcome::Accepted) => {}
                            Ok(outcome) => warn!(node = %node_name, %outcome, "processor rejected batch"),
                            Err(err) => warn!(node = %node_name, error = %err, "processor failed"),
                        }
                    }
                    None => break,
                }
            }
        }
    }
    info!(node = %node_name, "processor stopped");
}

async fn run_exporter(
    node_name: String,
    mut exporter: Box<dyn Exporter>,
    mut upstream: message::Receiver<AnyBatch>,
    mut ctrl: ControlChannel,
) {
    loop {
        tokio::select! {
            biased;
            msg = ctrl.recv() => {
                match msg {
                    Some(NodeControlMsg::Shutdown { .. }) | None => break,
                    Some(_) => {}
                }
            }
            data = upstream.recv() => {
                match data {
                    Some(batch) => match exporter.export(batch).await {
                        Ok(ConsumeOutcome::Accepted) => {}
                        Ok(outcome) => warn!(node = %node_name, %outcome, "exporter rejected batch"),
                        Err(err) => warn!(node = %node_name, error = %err, "exporter failed"),
                    },
                    None => break,
                }
            }
        }
    }
    if let Err(err) = exporter.shutdown().await {
        warn!(node = %node_name, error = %err, "exporter shutdown failed");
    }
    info!(node = %node_name, "exporter stopped");
}

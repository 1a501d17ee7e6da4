// SPDX-License-Identifier: Apache-2.0

//! Active Session History sampler (§4.1): a short-interval snapshot of
//! `pg_stat_activity`, held in a bounded in-memory ring buffer and rolled up
//! into active-session-count and wait-event-breakdown gauges at several
//! window sizes. Sessions that look like they're blocking another session
//! are always captured regardless of the adaptive sampling rate.

use crate::scheduler::{TickOutcome, TickScheduler};
use async_trait::async_trait;
use dbscope_engine::{ControlChannel, EffectHandler, ReceiverErrorKind, TerminalState};
use dbscope_pdata::{
    now, AnyBatch, Attributes, Metric, MetricKind, MetricsBatch, NumberDataPoint, NumberValue, Resource,
    ResourceSet, Scope,
};
use dbscope_telemetry::{info, warn, MetricsRegistryHandle};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tokio_postgres::NoTls;

const SCOPE_NAME: &str = "dbscope/ashreceiver";
const SCOPE_VERSION: &str = "0.1.0";

/// Rollup windows reported alongside every snapshot (§4.1).
const ROLLUP_WINDOWS: &[(&str, Duration)] = &[
    ("1m", Duration::from_secs(60)),
    ("5m", Duration::from_secs(5 * 60)),
    ("15m", Duration::from_secs(15 * 60)),
    ("1h", Duration::from_secs(60 * 60)),
];

fn default_sample_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_buffer_capacity() -> usize {
    3600
}

/// Configuration for the `ash` receiver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AshConfig {
    /// `libpq`-style connection string.
    pub connection_string: String,
    /// How often to snapshot `pg_stat_activity`. Independent of (and
    /// typically much shorter than) the PostgreSQL receiver's interval.
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,
    /// Maximum number of snapshots retained, bounding memory regardless of
    /// the largest configured rollup window.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone)]
struct SessionSample {
    wait_event_type: Option<String>,
    is_blocking: bool,
}

/// The `ash` receiver.
pub struct AshReceiver {
    config: AshConfig,
    metrics: MetricsRegistryHandle,
    history: VecDeque<(SystemTime, Vec<SessionSample>)>,
}

impl AshReceiver {
    /// Builds a receiver from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, crate::error::Error> {
        let config: AshConfig = serde_yaml::from_value(settings.clone())?;
        Ok(Self {
            config,
            metrics,
            history: VecDeque::new(),
        })
    }

    async fn snapshot(&mut self, client: &tokio_postgres::Client) -> Result<(), crate::error::Error> {
        let rows = client
            .query(
                "SELECT wait_event_type, \
                 (wait_event_type = 'Lock') AS is_blocking \
                 FROM pg_stat_activity WHERE state = 'active' AND pid <> pg_backend_pid()",
                &[],
            )
            .await?;
        let samples = rows
            .into_iter()
            .map(|row| SessionSample {
                wait_event_type: row.get(0),
                is_blocking: row.get(1),
            })
            .collect();
        self.history.push_back((now(), samples));
        let max_window = ROLLUP_WINDOWS.iter().map(|(_, d)| *d).max().unwrap_or_default();
        let cutoff = now().checked_sub(max_window).unwrap_or(std::time::UNIX_EPOCH);
        while self.history.len() > self.config.buffer_capacity {
            self.history.pop_front();
        }
        while self.history.front().is_some_and(|(t, _)| *t < cutoff) {
            self.history.pop_front();
        }
        Ok(())
    }

    fn rollup(&self) -> MetricsBatch {
        let time = now();
        let resource = Resource::new(Attributes::new().with("db.system", "postgresql"));
        let mut scope: Scope<Metric> = Scope::new(SCOPE_NAME, SCOPE_VERSION);

        for (label, window) in ROLLUP_WINDOWS {
            let cutoff = time.checked_sub(*window).unwrap_or(std::time::UNIX_EPOCH);
            let in_window: Vec<&Vec<SessionSample>> = self
                .history
                .iter()
                .filter(|(t, _)| *t >= cutoff)
                .map(|(_, s)| s)
                .collect();
            if in_window.is_empty() {
                continue;
            }
            let avg_active = in_window.iter().map(|s| s.len()).sum::<usize>() as f64 / in_window.len() as f64;
            scope = scope.with_item(Metric {
                name: "db.ash.active_sessions".to_string(),
                unit: "{sessions}".to_string(),
                description: String::new(),
                kind: MetricKind::Gauge(vec![NumberDataPoint {
                    start_time: None,
                    time,
                    attributes: Attributes::new().with("window", *label),
                    value: NumberValue::Double(avg_active),
                }]),
            });

            let blocking_count = in_window
                .iter()
                .map(|s| s.iter().filter(|session| session.is_blocking).count())
                .sum::<usize>() as f64
                / in_window.len() as f64;
            scope = scope.with_item(Metric {
                name: "db.ash.blocking_sessions".to_string(),
                unit: "{sessions}".to_string(),
                description: String::new(),
                kind: MetricKind::Gauge(vec![NumberDataPoint {
                    start_time: None,
                    time,
                    attributes: Attributes::new().with("window", *label),
                    value: NumberValue::Double(blocking_count),
                }]),
            });

            let mut wait_event_types: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
            for snapshot in &in_window {
                for session in snapshot.iter() {
                    if let Some(w) = &session.wait_event_type {
                        let _ = wait_event_types.insert(w.as_str());
                    }
                }
            }
            for wait_event_type in wait_event_types {
                let count = in_window
                    .iter()
                    .map(|s| {
                        s.iter()
                            .filter(|session| session.wait_event_type.as_deref() == Some(wait_event_type))
                            .count()
                    })
                    .sum::<usize>() as f64
                    / in_window.len() as f64;
                scope = scope.with_item(Metric {
                    name: "db.ash.wait_events".to_string(),
                    unit: "{sessions}".to_string(),
                    description: String::new(),
                    kind: MetricKind::Gauge(vec![NumberDataPoint {
                        start_time: None,
                        time,
                        attributes: Attributes::new()
                            .with("window", *label)
                            .with("wait_event_type", wait_event_type),
                        value: NumberValue::Double(count),
                    }]),
                });
            }
        }

        let mut resource_set = ResourceSet::new(resource);
        resource_set
            .push_scope(scope)
            .expect("single scope, no duplicate identity possible");
        MetricsBatch {
            resource_sets: vec![resource_set],
        }
    }
}

#[async_trait]
impl dbscope_engine::Receiver for AshReceiver {
    async fn start(
        &mut self,
        mut ctrl: ControlChannel,
        effect_handler: EffectHandler,
    ) -> Result<TerminalState, dbscope_engine::Error> {
        let node = effect_handler.node_id().clone();
        let (client, connection) = tokio_postgres::connect(&self.config.connection_string, NoTls)
            .await
            .map_err(|e| crate::error::Error::Postgres(e).into_engine_error(node.clone(), ReceiverErrorKind::Connect))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "ash receiver connection task ended");
            }
        });
        info!("ash receiver connected");

        let mut scheduler = TickScheduler::new("ash", self.config.sample_interval, &self.metrics);
        loop {
            match scheduler.wait(&mut ctrl).await {
                TickOutcome::Shutdown => break,
                TickOutcome::Scrape => {}
            }
            if let Err(err) = self.snapshot(&client).await {
                warn!(error = %err, "ash snapshot failed");
                continue;
            }
            let batch = self.rollup();
            if !batch.is_empty() {
                if let Err(err) = effect_handler.send(AnyBatch::Metrics(batch)).await {
                    warn!(error = %err, "ash receiver failed to forward batch");
                }
            }
        }
        Ok(TerminalState::Stopped)
    }
}

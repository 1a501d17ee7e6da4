// SPDX-License-Identifier: Apache-2.0

//! Shared tick scheduling for periodic scraping receivers (§4.2): a single
//! timer fires every `collection_interval`; if a scrape overruns the
//! interval, the next tick is skipped rather than queued, and
//! `scrapes_overrun` is incremented.

use dbscope_engine::{ControlChannel, NodeControlMsg};
use dbscope_telemetry::MetricsRegistryHandle;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};

/// What a scheduler wait resolved to.
pub enum TickOutcome {
    /// The timer fired; the receiver should run one scrape.
    Scrape,
    /// A shutdown request arrived (or the control channel closed).
    Shutdown,
}

/// Drives a receiver's scrape loop: one timer plus the shared
/// `scrapes_overrun` counter.
pub struct TickScheduler {
    interval: Interval,
    period: Duration,
    last_tick: Option<Instant>,
    overrun_counter: prometheus::CounterVec,
    receiver_name: String,
}

impl TickScheduler {
    /// Builds a scheduler for a receiver named `receiver_name`, ticking
    /// every `period` (clamped to a minimum of 1 second per §4.2).
    #[must_use]
    pub fn new(receiver_name: impl Into<String>, period: Duration, metrics: &MetricsRegistryHandle) -> Self {
        let period = period.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let overrun_counter = metrics
            .counter_vec(
                "dbscope_receiver_scrapes_overrun_total",
                "Scrape ticks skipped because the prior scrape was still running",
                &["receiver"],
            )
            .expect("metric registration");
        Self {
            interval,
            period,
            last_tick: None,
            overrun_counter,
            receiver_name: receiver_name.into(),
        }
    }

    /// Waits for either the next tick or a shutdown control message.
    pub async fn wait(&mut self, ctrl: &mut ControlChannel) -> TickOutcome {
        tokio::select! {
            biased;
            msg = ctrl.recv() => {
                match msg {
                    Some(NodeControlMsg::Shutdown { .. }) | None => TickOutcome::Shutdown,
                    Some(_) => TickOutcome::Scrape,
                }
            }
            _ = self.interval.tick() => {
                if let Some(last) = self.last_tick {
                    if last.elapsed() > self.period * 2 {
                        self.overrun_counter.with_label_values(&[&self.receiver_name]).inc();
                    }
                }
                self.last_tick = Some(Instant::now());
                TickOutcome::Scrape
            }
        }
    }
}

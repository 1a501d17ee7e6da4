// SPDX-License-Identifier: Apache-2.0

//! New Relic error monitor (§4.3.7): watches for export-acknowledgement
//! errors surfacing back through log records tagged by the exporter, and
//! raises a synthetic alert metric once the error rate over
//! `reporting_interval` crosses `alert_threshold`. Repeat alerts for the
//! same `error_type` are suppressed for `error_suppression_duration` so a
//! sustained outage doesn't spam an alert per batch.

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{AnyBatch, LogsBatch};
use dbscope_telemetry::MetricsRegistryHandle;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

fn default_error_attribute() -> String {
    "db.export.error_type".to_string()
}

fn default_reporting_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_error_suppression_duration() -> Duration {
    Duration::from_secs(300)
}

/// Configuration for the `nr_error_monitor` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NrErrorMonitorConfig {
    /// Log attribute set by the exporter on an acknowledgement-failure
    /// record, naming the error (e.g. `rate_limited`, `auth_failed`).
    #[serde(default = "default_error_attribute")]
    pub error_attribute: String,
    /// Window over which the error rate is computed.
    #[serde(default = "default_reporting_interval", with = "humantime_serde")]
    pub reporting_interval: Duration,
    /// Errors-per-`reporting_interval` count above which an alert fires.
    pub alert_threshold: u32,
    /// Minimum time between repeat alerts for the same `error_type`.
    #[serde(default = "default_error_suppression_duration", with = "humantime_serde")]
    pub error_suppression_duration: Duration,
}

/// The rolling error-count/alert-suppression bookkeeping, independently
/// testable without the processor's channel plumbing.
pub struct Watchdog {
    config: NrErrorMonitorConfig,
    recent_errors: HashMap<String, VecDeque<Instant>>,
    last_alert: HashMap<String, Instant>,
}

impl Watchdog {
    fn new(config: NrErrorMonitorConfig) -> Self {
        Self {
            config,
            recent_errors: HashMap::new(),
            last_alert: HashMap::new(),
        }
    }

    fn prune(&mut self, error_type: &str, now: Instant) {
        if let Some(q) = self.recent_errors.get_mut(error_type) {
            while let Some(&front) = q.front() {
                if now.duration_since(front) > self.config.reporting_interval {
                    let _ = q.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Records an error observation for `error_type`; returns `Some(count)`
    /// if an alert should fire now (threshold crossed and not currently
    /// suppressed).
    pub fn observe(&mut self, error_type: &str) -> Option<usize> {
        let now = Instant::now();
        self.prune(error_type, now);
        let q = self.recent_errors.entry(error_type.to_string()).or_default();
        q.push_back(now);
        let count = q.len();

        if count < self.config.alert_threshold as usize {
            return None;
        }
        if let Some(last) = self.last_alert.get(error_type) {
            if now.duration_since(*last) < self.config.error_suppression_duration {
                return None;
            }
        }
        let _ = self.last_alert.insert(error_type.to_string(), now);
        Some(count)
    }
}

/// The `nr_error_monitor` processor.
pub struct NrErrorMonitor {
    watchdog: Watchdog,
    alerts_total: prometheus::CounterVec,
    error_rate_gauge: prometheus::GaugeVec,
}

impl NrErrorMonitor {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: NrErrorMonitorConfig = serde_yaml::from_value(settings.clone())?;
        let alerts_total = metrics.counter_vec(
            "dbscope_nr_error_monitor_alerts_total",
            "Synthetic alerts raised for sustained export errors",
            &["error_type"],
        )?;
        let error_rate_gauge = metrics.gauge_vec(
            "dbscope_nr_error_monitor_error_rate",
            "Errors observed in the current reporting_interval window",
            &["error_type"],
        )?;
        Ok(Self {
            watchdog: Watchdog::new(config),
            alerts_total,
            error_rate_gauge,
        })
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        for rs in &mut batch.resource_sets {
            for scope in &mut rs.scopes {
                for record in &mut scope.items {
                    let Some(error_type) = record
                        .attributes
                        .get(&self.watchdog.config.error_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                    else {
                        continue;
                    };
                    if let Some(count) = self.watchdog.observe(&error_type) {
                        self.error_rate_gauge.with_label_values(&[&error_type]).set(count as f64);
                        self.alerts_total.with_label_values(&[&error_type]).inc();
                        record.attributes.insert("db.nr_error_monitor.alert", true);
                        record.attributes.insert("db.nr_error_monitor.error_count", count as i64);
                        dbscope_telemetry::warn!(
                            error_type = %error_type,
                            count,
                            "sustained export error rate crossed alert_threshold"
                        );
                    }
                }
            }
        }
        batch
    }
}

#[async_trait]
impl Processor for NrErrorMonitor {
    async fn process(
        &mut self,
        data: AnyBatch,
        effect_handler: &EffectHandler,
    ) -> Result<ConsumeOutcome, dbscope_engine::Error> {
        let out = match data {
            AnyBatch::Logs(batch) => AnyBatch::Logs(self.process_logs(batch)),
            other => other,
        };
        if out.is_empty() {
            return Ok(ConsumeOutcome::Accepted);
        }
        match effect_handler.send(out).await {
            Ok(()) => Ok(ConsumeOutcome::Accepted),
            Err(dbscope_engine::Error::ChannelClosed { .. }) => {
                Ok(ConsumeOutcome::RetryableError("downstream channel closed".to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> NrErrorMonitorConfig {
        NrErrorMonitorConfig {
            error_attribute: "db.export.error_type".to_string(),
            reporting_interval: Duration::from_secs(60),
            alert_threshold: 3,
            error_suppression_duration: Duration::from_millis(50),
        }
    }

    #[test]
    fn alert_fires_once_threshold_crossed_and_is_suppressed_until_window_elapses() {
        let mut wd = Watchdog::new(cfg());
        assert_eq!(wd.observe("rate_limited"), None);
        assert_eq!(wd.observe("rate_limited"), None);
        assert_eq!(wd.observe("rate_limited"), Some(3));
        // Immediately repeating: suppressed.
        assert_eq!(wd.observe("rate_limited"), None);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(wd.observe("rate_limited"), Some(5));
    }

    #[test]
    fn distinct_error_types_tracked_independently() {
        let mut wd = Watchdog::new(cfg());
        assert_eq!(wd.observe("auth_failed"), None);
        assert_eq!(wd.observe("rate_limited"), None);
        assert_eq!(wd.observe("auth_failed"), None);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! A small wrapper around [`prometheus::Registry`] that lets every component
//! register (or fetch an already-registered) counter/gauge/histogram vec by
//! name, matching the self-metrics named throughout §4.5 (`scrape_duration`,
//! `receiver_accepted_*`, `processor_queued_*`, `exporter_send_failed_*`,
//! `queue_size`, `queue_capacity`, per-component error counters,
//! circuit-breaker state).

use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Errors raised while registering or encoding metrics.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    /// The underlying `prometheus` crate rejected the registration (e.g.
    /// duplicate name with incompatible label set).
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

/// The process-wide metrics registry. Cheaply cloneable; all clones share
/// the same underlying `prometheus::Registry` and metric cache.
#[derive(Clone)]
pub struct MetricsRegistryHandle(Arc<Inner>);

struct Inner {
    prometheus: Registry,
    counters: Mutex<HashMap<String, CounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

/// Builder/owner type; construct once at startup (§9: "global state...
/// initialized before pipelines start and frozen thereafter"), then hand out
/// [`MetricsRegistryHandle`] clones to components.
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Creates a fresh, empty registry handle.
    #[must_use]
    pub fn new() -> MetricsRegistryHandle {
        MetricsRegistryHandle(Arc::new(Inner {
            prometheus: Registry::new(),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }))
    }
}

impl Default for MetricsRegistryHandle {
    fn default() -> Self {
        MetricsRegistry::new()
    }
}

impl MetricsRegistryHandle {
    /// Returns (registering lazily) a counter vec with the given name, help
    /// text, and label names.
    pub fn counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<CounterVec, TelemetryError> {
        let mut guard = self.0.counters.lock().expect("counters mutex poisoned");
        if let Some(c) = guard.get(name) {
            return Ok(c.clone());
        }
        let cv = CounterVec::new(Opts::new(name, help), labels)?;
        self.0.prometheus.register(Box::new(cv.clone()))?;
        let _ = guard.insert(name.to_string(), cv.clone());
        Ok(cv)
    }

    /// Returns (registering lazily) a gauge vec.
    pub fn gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<GaugeVec, TelemetryError> {
        let mut guard = self.0.gauges.lock().expect("gauges mutex poisoned");
        if let Some(g) = guard.get(name) {
            return Ok(g.clone());
        }
        let gv = GaugeVec::new(Opts::new(name, help), labels)?;
        self.0.prometheus.register(Box::new(gv.clone()))?;
        let _ = guard.insert(name.to_string(), gv.clone());
        Ok(gv)
    }

    /// Returns (registering lazily) a histogram vec with default buckets.
    pub fn histogram_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<HistogramVec, TelemetryError> {
        let mut guard = self.0.histograms.lock().expect("histograms mutex poisoned");
        if let Some(h) = guard.get(name) {
            return Ok(h.clone());
        }
        let hv = HistogramVec::new(prometheus::HistogramOpts::new(name, help), labels)?;
        self.0.prometheus.register(Box::new(hv.clone()))?;
        let _ = guard.insert(name.to_string(), hv.clone());
        Ok(hv)
    }

    /// Encodes the current state of every registered metric in the
    /// Prometheus text exposition format (§6 `GET /metrics`).
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let families = self.0.prometheus.gather();
        let mut buf = String::new();
        TextEncoder::new()
            .encode_utf8(&families, &mut buf)
            .map_err(prometheus::Error::Io)?;
        Ok(buf)
    }

    /// Clears every registered metric and its cache entry. Used by
    /// `reset_for_test` (§9) so integration tests can rebuild a `Service`
    /// without leaking metric registrations across test cases.
    pub fn reset_for_test(&self) {
        let _ = self.0.prometheus.gather(); // flush any pending collection
        self.0.counters.lock().expect("counters mutex poisoned").clear();
        self.0.gauges.lock().expect("gauges mutex poisoned").clear();
        self.0
            .histograms
            .lock()
            .expect("histograms mutex poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_vec_is_idempotent() {
        let reg = MetricsRegistry::new();
        let a = reg.counter_vec("dbscope_test_total", "test", &["component"]).unwrap();
        let b = reg.counter_vec("dbscope_test_total", "test", &["component"]).unwrap();
        a.with_label_values(&["x"]).inc();
        assert_eq!(b.with_label_values(&["x"]).get(), 1.0);
    }

    #[test]
    fn encode_includes_registered_metrics() {
        let reg = MetricsRegistry::new();
        let g = reg.gauge_vec("dbscope_queue_size", "queue size", &["exporter"]).unwrap();
        g.with_label_values(&["otlp"]).set(4.0);
        let text = reg.encode().unwrap();
        assert!(text.contains("dbscope_queue_size"));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Cost controller (§4.3.4): linearizes a monthly USD budget into a
//! per-minute byte allowance, bounds metric cardinality by stripping
//! configured high-cardinality dimensions once a metric name's distinct
//! attribute combinations exceed a limit, truncates oversized log bodies,
//! and switches to an aggressive mode (halved effective volume via
//! histogram bucket merging and item dropping) once projected spend
//! crosses the budget.

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{AnyBatch, HistogramDataPoint, LogBody, Metric, MetricKind, MetricsBatch, LogsBatch};
use dbscope_telemetry::MetricsRegistryHandle;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

fn default_max_log_body_size() -> usize {
    4096
}

fn default_aggressive_mode_threshold_percent() -> f64 {
    90.0
}

const MINUTES_PER_MONTH: f64 = 30.0 * 24.0 * 60.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
/// Per-attribute-entry byte estimate used to approximate a batch's wire
/// size without a real protobuf encode, mirroring the adaptive sampler's
/// `BYTES_PER_DEDUP_ENTRY` heuristic.
const BYTES_PER_ATTRIBUTE: usize = 48;
const BYTES_PER_ITEM_OVERHEAD: usize = 32;

/// Configuration for the `cost_control` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostControlConfig {
    /// Monthly telemetry egress budget in USD.
    pub monthly_budget_usd: f64,
    /// Vendor price per GB ingested.
    pub price_per_gb: f64,
    /// Maximum distinct attribute combinations tracked per metric name
    /// before `high_cardinality_dimensions` are stripped from new series.
    pub metric_cardinality_limit: usize,
    /// Attribute keys stripped from a metric's point attributes once its
    /// cardinality limit is reached.
    #[serde(default)]
    pub high_cardinality_dimensions: Vec<String>,
    /// Log bodies longer than this (bytes) are truncated and flagged.
    #[serde(default = "default_max_log_body_size")]
    pub max_log_body_size: usize,
    /// Percentage of the monthly budget at which aggressive mode engages.
    #[serde(default = "default_aggressive_mode_threshold_percent")]
    pub aggressive_mode_threshold_percent: f64,
}

struct PerMinuteWindow {
    started_at: Instant,
    bytes: u64,
}

impl PerMinuteWindow {
    fn new() -> Self {
        Self { started_at: Instant::now(), bytes: 0 }
    }

    fn add(&mut self, bytes: u64) {
        let now = Instant::now();
        if now.duration_since(self.started_at) >= Duration::from_secs(60) {
            self.started_at = now;
            self.bytes = 0;
        }
        self.bytes += bytes;
    }
}

/// Tracks distinct attribute-combination keys seen per metric name, capped
/// at `metric_cardinality_limit`.
struct CardinalityLimiter {
    limit: usize,
    seen: HashMap<String, HashSet<String>>,
}

impl CardinalityLimiter {
    fn new(limit: usize) -> Self {
        Self { limit, seen: HashMap::new() }
    }

    /// Registers a combination key for `metric_name`; returns true if the
    /// limit was already reached before this call (i.e. this combination
    /// should be collapsed by stripping high-cardinality dimensions).
    fn over_limit(&mut self, metric_name: &str, combo_key: &str) -> bool {
        let set = self.seen.entry(metric_name.to_string()).or_default();
        if set.contains(combo_key) {
            return false;
        }
        if set.len() >= self.limit {
            return true;
        }
        let _ = set.insert(combo_key.to_string());
        false
    }
}

fn combo_key(attrs: &dbscope_pdata::Attributes) -> String {
    attrs.iter().map(|(k, v)| format!("{k}={v:?}")).collect::<Vec<_>>().join(",")
}

fn estimate_metric_bytes(metric: &Metric) -> u64 {
    let points: usize = match &metric.kind {
        MetricKind::Gauge(p) => p.len(),
        MetricKind::Sum { points, .. } => points.len(),
        MetricKind::Histogram(p) => p.len(),
        MetricKind::ExponentialHistogram(p) => p.len(),
        MetricKind::Summary(p) => p.len(),
    };
    let attr_count: usize = match &metric.kind {
        MetricKind::Gauge(p) => p.iter().map(|d| d.attributes.len()).sum(),
        MetricKind::Sum { points, .. } => points.iter().map(|d| d.attributes.len()).sum(),
        MetricKind::Histogram(p) => p.iter().map(|d| d.attributes.len()).sum(),
        MetricKind::ExponentialHistogram(p) => p.iter().map(|d| d.attributes.len()).sum(),
        MetricKind::Summary(p) => p.iter().map(|d| d.attributes.len()).sum(),
    };
    (points * BYTES_PER_ITEM_OVERHEAD + attr_count * BYTES_PER_ATTRIBUTE + metric.name.len()) as u64
}

/// Merges adjacent histogram buckets pairwise, halving bucket count, to
/// shrink an aggressive-mode batch's wire size at the cost of resolution.
fn merge_histogram_buckets(point: &mut HistogramDataPoint) {
    if point.bucket_bounds.len() < 2 {
        return;
    }
    let mut new_bounds = Vec::with_capacity(point.bucket_bounds.len() / 2 + 1);
    let mut new_counts = Vec::with_capacity(point.bucket_counts.len() / 2 + 1);
    let mut i = 0;
    while i < point.bucket_bounds.len() {
        new_bounds.push(point.bucket_bounds[i]);
        i += 2;
    }
    let mut j = 0;
    while j < point.bucket_counts.len() {
        let merged = point.bucket_counts[j] + point.bucket_counts.get(j + 1).copied().unwrap_or(0);
        new_counts.push(merged);
        j += 2;
    }
    point.bucket_bounds = new_bounds;
    point.bucket_counts = new_counts;
}

/// The `cost_control` processor.
pub struct CostControl {
    config: CostControlConfig,
    window: PerMinuteWindow,
    cardinality: CardinalityLimiter,
    aggressive: bool,
    drop_parity: u64,
    projected_cost_gauge: prometheus::Gauge,
    aggressive_mode_gauge: prometheus::Gauge,
    cardinality_stripped_total: prometheus::CounterVec,
    log_truncated_total: prometheus::CounterVec,
}

impl CostControl {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: CostControlConfig = serde_yaml::from_value(settings.clone())?;
        let cardinality = CardinalityLimiter::new(config.metric_cardinality_limit.max(1));
        let projected_cost_gauge = metrics
            .gauge_vec("dbscope_cost_control_projected_monthly_usd", "Projected monthly spend at current rate", &[])?
            .with_label_values(&[]);
        let aggressive_mode_gauge = metrics
            .gauge_vec("dbscope_cost_control_aggressive_mode", "1 if aggressive mode is active", &[])?
            .with_label_values(&[]);
        let cardinality_stripped_total = metrics.counter_vec(
            "dbscope_cost_control_cardinality_stripped_total",
            "Series collapsed by stripping high-cardinality dimensions",
            &["metric"],
        )?;
        let log_truncated_total = metrics.counter_vec(
            "dbscope_cost_control_log_truncated_total",
            "Log bodies truncated for exceeding max_log_body_size",
            &[],
        )?;
        Ok(Self {
            config,
            window: PerMinuteWindow::new(),
            cardinality,
            aggressive: false,
            drop_parity: 0,
            projected_cost_gauge,
            aggressive_mode_gauge,
            cardinality_stripped_total,
            log_truncated_total,
        })
    }

    fn record_bytes_and_update_mode(&mut self, bytes: u64) {
        self.window.add(bytes);
        let bytes_per_minute = self.window.bytes as f64;
        let projected_gb_per_month = (bytes_per_minute / BYTES_PER_GB) * MINUTES_PER_MONTH;
        let projected_cost = projected_gb_per_month * self.config.price_per_gb;
        self.projected_cost_gauge.set(projected_cost);

        let threshold = self.config.monthly_budget_usd * (self.config.aggressive_mode_threshold_percent / 100.0);
        self.aggressive = projected_cost >= threshold;
        self.aggressive_mode_gauge.set(if self.aggressive { 1.0 } else { 0.0 });
    }

    /// In aggressive mode, drops every other non-critical item as a crude
    /// volume cut; outside aggressive mode, nothing is dropped here (the
    /// adaptive sampler is the primary volume control).
    fn aggressive_drop(&mut self) -> bool {
        if !self.aggressive {
            return false;
        }
        self.drop_parity = self.drop_parity.wrapping_add(1);
        self.drop_parity % 2 == 0
    }

    fn process_metrics(&mut self, mut batch: MetricsBatch) -> MetricsBatch {
        let mut total_bytes = 0u64;
        for rs in &mut batch.resource_sets {
            for scope in &mut rs.scopes {
                scope.items.retain_mut(|metric| {
                    total_bytes += estimate_metric_bytes(metric);
                    self.strip_high_cardinality(metric);
                    if self.aggressive {
                        if let MetricKind::Histogram(points) = &mut metric.kind {
                            for p in points {
                                merge_histogram_buckets(p);
                            }
                        }
                    }
                    !self.aggressive_drop()
                });
            }
        }
        self.record_bytes_and_update_mode(total_bytes);
        batch
    }

    fn strip_high_cardinality(&mut self, metric: &mut Metric) {
        if self.config.high_cardinality_dimensions.is_empty() {
            return;
        }
        let name = metric.name.clone();
        let over = |limiter: &mut CardinalityLimiter, attrs: &dbscope_pdata::Attributes| {
            limiter.over_limit(&name, &combo_key(attrs))
        };
        let mut stripped_any = false;
        macro_rules! strip_points {
            ($points:expr) => {
                for p in $points {
                    if over(&mut self.cardinality, &p.attributes) {
                        p.attributes.remove_all(&self.config.high_cardinality_dimensions);
                        stripped_any = true;
                    }
                }
            };
        }
        match &mut metric.kind {
            MetricKind::Gauge(points) => strip_points!(points),
            MetricKind::Sum { points, .. } => strip_points!(points),
            MetricKind::Histogram(points) => strip_points!(points),
            MetricKind::ExponentialHistogram(points) => strip_points!(points),
            MetricKind::Summary(points) => strip_points!(points),
        }
        if stripped_any {
            self.cardinality_stripped_total.with_label_values(&[&metric.name]).inc();
        }
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        for rs in &mut batch.resource_sets {
            for scope in &mut rs.scopes {
                for record in &mut scope.items {
                    let body_len = record.body.as_str().len();
                    if body_len > self.config.max_log_body_size {
                        let truncated = record.body.as_str()[..self.config.max_log_body_size].to_string();
                        record.body = LogBody::String(truncated);
                        record.attributes.insert("log.truncated", true);
                        self.log_truncated_total.with_label_values(&[]).inc();
                    }
                }
            }
        }
        batch
    }
}

#[async_trait]
impl Processor for CostControl {
    async fn process(
        &mut self,
        data: AnyBatch,
        effect_handler: &EffectHandler,
    ) -> Result<ConsumeOutcome, dbscope_engine::Error> {
        let out = match data {
            AnyBatch::Metrics(batch) => AnyBatch::Metrics(self.process_metrics(batch)),
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
    use dbscope_pdata::{Attributes, NumberDataPoint, NumberValue};
    use std::time::SystemTime;

    fn point(db: &str) -> NumberDataPoint {
        NumberDataPoint {
            start_time: None,
            time: SystemTime::now(),
            attributes: Attributes::new().with("db.name", db).with("query.id", db),
            value: NumberValue::Int(1),
        }
    }

    #[test]
    fn cardinality_limiter_strips_dimensions_once_over_limit() {
        let mut limiter = CardinalityLimiter::new(2);
        assert!(!limiter.over_limit("m", "a"));
        assert!(!limiter.over_limit("m", "b"));
        assert!(limiter.over_limit("m", "c"));
        // Already-seen combos never count as "over".
        assert!(!limiter.over_limit("m", "a"));
    }

    #[test]
    fn strip_high_cardinality_removes_configured_keys_once_limit_reached() {
        let metrics = dbscope_telemetry::MetricsRegistry::new();
        let settings = serde_yaml::from_str(
            "monthly_budget_usd: 100\nprice_per_gb: 0.1\nmetric_cardinality_limit: 1\nhigh_cardinality_dimensions: [\"query.id\"]\n",
        )
        .unwrap();
        let mut cc = CostControl::from_settings(&settings, metrics).unwrap();
        let mut m = Metric {
            name: "db.query.duration".into(),
            unit: "ms".into(),
            description: String::new(),
            kind: MetricKind::Gauge(vec![point("a"), point("b")]),
        };
        cc.strip_high_cardinality(&mut m);
        let MetricKind::Gauge(points) = &m.kind else { unreachable!() };
        assert!(points[0].attributes.get("query.id").is_some());
        assert!(points[1].attributes.get("query.id").is_none());
    }

    #[test]
    fn merge_histogram_buckets_halves_bucket_count() {
        let mut p = HistogramDataPoint {
            start_time: None,
            time: SystemTime::now(),
            attributes: Attributes::new(),
            count: 10,
            sum: Some(1.0),
            bucket_bounds: vec![1.0, 2.0, 3.0, 4.0],
            bucket_counts: vec![1, 2, 3, 2, 2],
            min: None,
            max: None,
        };
        merge_histogram_buckets(&mut p);
        assert_eq!(p.bucket_bounds.len(), 2);
        assert_eq!(p.bucket_counts.iter().sum::<u64>(), 10);
    }
}

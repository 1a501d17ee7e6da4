// SPDX-License-Identifier: Apache-2.0

//! Adaptive sampler (§4.3.1): rule-ordered, deterministic sampling with a
//! token-bucket rate cap and an LRU-bounded dedup table.
//!
//! Rules are tried highest-priority first; the first whose conditions all
//! match decides the sample rate. The keep/drop decision for a record
//! carrying a `dedup_key_attribute` is a deterministic hash of
//! `(rule_name, dedup_key)`, so repeated observations of the same key are
//! consistent for as long as the dedup table remembers the key. Once the
//! table is full, a new key's decision falls back to a random draw rather
//! than evicting and re-hashing an older entry — the stated memory-cap
//! behavior, not a refinement of it.

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{
    AnyBatch, AttributeValue, Attributes, HistogramDataPoint, LogRecord, LogsBatch, Metric,
    MetricKind, MetricsBatch, NumberDataPoint, Resource, Span, SummaryDataPoint, TracesBatch,
};
use dbscope_telemetry::MetricsRegistryHandle;
use lru::LruCache;
use rand::Rng;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

fn default_default_rate() -> f64 {
    1.0
}

fn default_dedup_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_memory_mib() -> usize {
    64
}

/// A rule condition's comparison operator (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than (numeric).
    Gt,
    /// Greater than or equal (numeric).
    Ge,
    /// Less than (numeric).
    Lt,
    /// Less than or equal (numeric).
    Le,
    /// Substring match.
    Contains,
    /// Regular expression match.
    Matches,
}

/// One attribute predicate within a rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    /// Attribute key to test.
    pub attribute: String,
    /// Comparison operator.
    pub op: Operator,
    /// Comparison operand, compared as a string or parsed as `f64` depending
    /// on `op`.
    pub value: String,
}

/// One sampling rule (§4.3.1). A rule with no conditions matches every
/// record (the `match = *` wildcard in the spec's end-to-end scenario).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Rule name, used as part of the deterministic dedup hash.
    pub name: String,
    /// Higher priority rules are tried first.
    #[serde(default)]
    pub priority: i32,
    /// All conditions must match for the rule to apply.
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    /// Sample rate in `[0, 1]` applied when this rule matches.
    pub sample_rate: f64,
}

/// Configuration for the `adaptive_sampler` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveSamplerConfig {
    /// Rules, tried in descending priority order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Sample rate for records no rule matches.
    #[serde(default = "default_default_rate")]
    pub default_rate: f64,
    /// Attribute used as the dedup key for deterministic sampling, e.g.
    /// `db.query.plan.hash`. Records without this attribute (or with it
    /// unset) fall back to a random draw.
    #[serde(default)]
    pub dedup_key_attribute: Option<String>,
    /// How long a cached decision for a dedup key is considered current.
    /// Informational for now: the LRU table has no independent expiry, so a
    /// resident key's decision is consistent at least this long and
    /// typically longer (§4.3.1, §8's idempotence property).
    #[serde(default = "default_dedup_window", with = "humantime_serde")]
    pub dedup_window: Duration,
    /// Token-bucket cap on records admitted per minute, across all rules.
    /// `None` means unlimited.
    #[serde(default)]
    pub max_records_per_minute: Option<u32>,
    /// Upper bound on the dedup table's memory footprint.
    #[serde(default = "default_max_memory_mib")]
    pub max_memory_mib: usize,
}

struct CompiledCondition {
    attribute: String,
    op: Operator,
    value: String,
    regex: Option<regex::Regex>,
}

impl CompiledCondition {
    fn matches(&self, attrs: &Attributes) -> bool {
        let Some(actual) = attrs.get(&self.attribute) else {
            return false;
        };
        match self.op {
            Operator::Eq => attribute_display(actual) == self.value,
            Operator::Ne => attribute_display(actual) != self.value,
            Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
                let (Some(a), Ok(b)) = (actual.as_f64(), self.value.parse::<f64>()) else {
                    return false;
                };
                match self.op {
                    Operator::Gt => a > b,
                    Operator::Ge => a >= b,
                    Operator::Lt => a < b,
                    Operator::Le => a <= b,
                    Operator::Eq | Operator::Ne | Operator::Contains | Operator::Matches => unreachable!(),
                }
            }
            Operator::Contains => attribute_display(actual).contains(&self.value),
            Operator::Matches => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(&attribute_display(actual))),
        }
    }
}

fn attribute_display(v: &AttributeValue) -> String {
    match v {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Double(d) => d.to_string(),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Bytes(b) => format!("{b:?}"),
        AttributeValue::Array(items) => format!("{items:?}"),
    }
}

struct CompiledRule {
    name: String,
    priority: i32,
    conditions: Vec<CompiledCondition>,
    sample_rate: f64,
}

/// Anything the sampler can make a keep/drop decision about: a metric data
/// point, a log record, or a span (§4.3.1: "log record, span, or data
/// point").
trait Sampleable {
    fn attrs(&self) -> &Attributes;
}

impl Sampleable for NumberDataPoint {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}
impl Sampleable for HistogramDataPoint {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}
impl Sampleable for dbscope_pdata::ExponentialHistogramDataPoint {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}
impl Sampleable for SummaryDataPoint {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}
impl Sampleable for LogRecord {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}
impl Sampleable for Span {
    fn attrs(&self) -> &Attributes {
        &self.attributes
    }
}

fn merged(resource: &Resource, item: &Attributes) -> Attributes {
    let mut out = resource.attributes().clone();
    for (k, v) in item.iter() {
        out.insert(k.to_string(), v.clone());
    }
    out
}

fn deterministic_fraction(key: &str) -> f64 {
    let hash = blake3::hash(key.as_bytes());
    let bytes: [u8; 8] = hash.as_bytes()[0..8].try_into().expect("hash is 32 bytes");
    (u64::from_le_bytes(bytes) as f64) / (u64::MAX as f64)
}

/// The `adaptive_sampler` processor.
pub struct AdaptiveSampler {
    config: AdaptiveSamplerConfig,
    rules: Vec<CompiledRule>,
    dedup: LruCache<String, bool>,
    bucket: Option<TokenBucket>,
    rng: rand::rngs::ThreadRng,
    kept_total: prometheus::CounterVec,
    dropped_total: prometheus::CounterVec,
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(per_minute: u32) -> Self {
        let capacity = f64::from(per_minute);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

const BYTES_PER_DEDUP_ENTRY: usize = 96;

fn dedup_capacity(max_memory_mib: usize) -> NonZeroUsize {
    let bytes = max_memory_mib.saturating_mul(1024 * 1024);
    NonZeroUsize::new((bytes / BYTES_PER_DEDUP_ENTRY).max(1)).expect("capacity clamped to >= 1")
}

impl AdaptiveSampler {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: AdaptiveSamplerConfig = serde_yaml::from_value(settings.clone())?;
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let mut conditions = Vec::with_capacity(rule.conditions.len());
            for c in &rule.conditions {
                let regex = match c.op {
                    Operator::Matches => Some(regex::Regex::new(&c.value)?),
                    _ => None,
                };
                conditions.push(CompiledCondition {
                    attribute: c.attribute.clone(),
                    op: c.op,
                    value: c.value.clone(),
                    regex,
                });
            }
            rules.push(CompiledRule {
                name: rule.name.clone(),
                priority: rule.priority,
                conditions,
                sample_rate: rule.sample_rate,
            });
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        let bucket = config.max_records_per_minute.map(TokenBucket::new);
        let dedup = LruCache::new(dedup_capacity(config.max_memory_mib));
        let kept_total = metrics.counter_vec(
            "dbscope_adaptive_sampler_kept_total",
            "Records kept by the adaptive sampler",
            &["rule"],
        )?;
        let dropped_total = metrics.counter_vec(
            "dbscope_adaptive_sampler_dropped_total",
            "Records dropped by the adaptive sampler",
            &["reason"],
        )?;
        Ok(Self {
            config,
            rules,
            dedup,
            bucket,
            rng: rand::thread_rng(),
            kept_total,
            dropped_total,
        })
    }

    fn select_rule(&self, attrs: &Attributes) -> (&str, f64) {
        for rule in &self.rules {
            if rule.conditions.iter().all(|c| c.matches(attrs)) {
                return (&rule.name, rule.sample_rate);
            }
        }
        ("__default__", self.config.default_rate)
    }

    fn decide(&mut self, rule_name: &str, dedup_key: Option<&str>, sample_rate: f64) -> bool {
        match dedup_key {
            None => self.rng.gen::<f64>() < sample_rate,
            Some(key) => {
                let cache_key = format!("{rule_name}:{key}");
                if let Some(&kept) = self.dedup.get(&cache_key) {
                    return kept;
                }
                let at_capacity = self.dedup.len() >= self.dedup.cap().get();
                let kept = if at_capacity {
                    self.rng.gen::<f64>() < sample_rate
                } else {
                    deterministic_fraction(&cache_key) < sample_rate
                };
                let _ = self.dedup.put(cache_key, kept);
                kept
            }
        }
    }

    fn sample_items<T: Sampleable>(&mut self, resource: &Resource, items: Vec<T>) -> Vec<T> {
        let dedup_attr = self.config.dedup_key_attribute.clone();
        items
            .into_iter()
            .filter(|item| {
                let attrs = merged(resource, item.attrs());
                if let Some(bucket) = &mut self.bucket {
                    if !bucket.try_consume() {
                        self.dropped_total.with_label_values(&["rate_limited"]).inc();
                        return false;
                    }
                }
                let (rule_name, rate) = {
                    let (name, rate) = self.select_rule(&attrs);
                    (name.to_string(), rate)
                };
                let dedup_key = dedup_attr.as_deref().and_then(|k| attrs.get(k)).map(attribute_display);
                let kept = self.decide(&rule_name, dedup_key.as_deref(), rate);
                if kept {
                    self.kept_total.with_label_values(&[&rule_name]).inc();
                } else {
                    self.dropped_total.with_label_values(&["sampled"]).inc();
                }
                kept
            })
            .collect()
    }

    fn process_metrics(&mut self, mut batch: MetricsBatch) -> MetricsBatch {
        for rs in &mut batch.resource_sets {
            let resource = rs.resource.clone();
            for scope in &mut rs.scopes {
                for metric in &mut scope.items {
                    metric.kind = match std::mem::replace(&mut metric.kind, MetricKind::Gauge(Vec::new())) {
                        MetricKind::Gauge(points) => MetricKind::Gauge(self.sample_items(&resource, points)),
                        MetricKind::Sum {
                            points,
                            temporality,
                            monotonic,
                        } => MetricKind::Sum {
                            points: self.sample_items(&resource, points),
                            temporality,
                            monotonic,
                        },
                        MetricKind::Histogram(points) => MetricKind::Histogram(self.sample_items(&resource, points)),
                        MetricKind::ExponentialHistogram(points) => {
                            MetricKind::ExponentialHistogram(self.sample_items(&resource, points))
                        }
                        MetricKind::Summary(points) => MetricKind::Summary(self.sample_items(&resource, points)),
                    };
                }
                scope.items.retain(|m: &Metric| !metric_is_empty(m));
            }
            rs.scopes.retain(|s| !s.items.is_empty());
        }
        batch.resource_sets.retain(|rs| !rs.scopes.is_empty());
        batch
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        for rs in &mut batch.resource_sets {
            let resource = rs.resource.clone();
            for scope in &mut rs.scopes {
                scope.items = self.sample_items(&resource, std::mem::take(&mut scope.items));
            }
            rs.scopes.retain(|s| !s.items.is_empty());
        }
        batch.resource_sets.retain(|rs| !rs.scopes.is_empty());
        batch
    }

    fn process_traces(&mut self, mut batch: TracesBatch) -> TracesBatch {
        for rs in &mut batch.resource_sets {
            let resource = rs.resource.clone();
            for scope in &mut rs.scopes {
                scope.items = self.sample_items(&resource, std::mem::take(&mut scope.items));
            }
            rs.scopes.retain(|s| !s.items.is_empty());
        }
        batch.resource_sets.retain(|rs| !rs.scopes.is_empty());
        batch
    }
}

fn metric_is_empty(m: &Metric) -> bool {
    match &m.kind {
        MetricKind::Gauge(p) => p.is_empty(),
        MetricKind::Sum { points, .. } => points.is_empty(),
        MetricKind::Histogram(p) => p.is_empty(),
        MetricKind::ExponentialHistogram(p) => p.is_empty(),
        MetricKind::Summary(p) => p.is_empty(),
    }
}

#[async_trait]
impl Processor for AdaptiveSampler {
    async fn process(
        &mut self,
        data: AnyBatch,
        effect_handler: &EffectHandler,
    ) -> Result<ConsumeOutcome, dbscope_engine::Error> {
        let out = match data {
            AnyBatch::Metrics(b) => AnyBatch::Metrics(self.process_metrics(b)),
            AnyBatch::Logs(b) => AnyBatch::Logs(self.process_logs(b)),
            AnyBatch::Traces(b) => AnyBatch::Traces(self.process_traces(b)),
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
    use dbscope_pdata::{LogBody, Severity};
    use std::time::SystemTime;

    fn settings(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn log(mean_time_ms: Option<f64>) -> LogRecord {
        let mut attrs = Attributes::new();
        if let Some(v) = mean_time_ms {
            attrs.insert("mean_time_ms", v);
        }
        LogRecord {
            time: SystemTime::now(),
            severity: Severity::INFO,
            body: LogBody::String("q".to_string()),
            attributes: attrs,
            trace_id: None,
            span_id: None,
        }
    }

    #[test]
    fn critical_rule_always_kept_bulk_rule_approximately_sampled() {
        let cfg = settings(
            r"
rules:
  - name: critical
    priority: 100
    conditions:
      - attribute: mean_time_ms
        op: gt
        value: '1000'
    sample_rate: 1.0
  - name: bulk
    priority: 10
    conditions: []
    sample_rate: 0.1
default_rate: 0.1
max_memory_mib: 1
",
        );
        let mut sampler = AdaptiveSampler::from_settings(&cfg, dbscope_telemetry::MetricsRegistry::new()).unwrap();
        let resource = Resource::default();

        let mut critical = Vec::new();
        for _ in 0..10 {
            critical.push(log(Some(2000.0)));
        }
        let kept_critical = sampler.sample_items(&resource, critical);
        assert_eq!(kept_critical.len(), 10);

        let mut bulk = Vec::new();
        for _ in 0..100 {
            bulk.push(log(Some(50.0)));
        }
        let kept_bulk = sampler.sample_items(&resource, bulk).len();
        assert!((5..=20).contains(&kept_bulk), "kept {kept_bulk} of 100 at rate 0.1");
    }

    #[test]
    fn dedup_key_decision_is_idempotent_within_the_table() {
        let cfg = settings(
            r"
rules: []
default_rate: 0.5
dedup_key_attribute: plan_hash
max_memory_mib: 1
",
        );
        let mut sampler = AdaptiveSampler::from_settings(&cfg, dbscope_telemetry::MetricsRegistry::new()).unwrap();
        let resource = Resource::default();
        let mut attrs = Attributes::new();
        attrs.insert("plan_hash", "abc123");
        let record = LogRecord {
            time: SystemTime::now(),
            severity: Severity::INFO,
            body: LogBody::String("q".into()),
            attributes: attrs,
            trace_id: None,
            span_id: None,
        };
        let first = sampler.sample_items(&resource, vec![record.clone()]).len();
        let second = sampler.sample_items(&resource, vec![record]).len();
        assert_eq!(first, second);
    }

    #[test]
    fn rate_limit_drops_once_bucket_exhausted() {
        let cfg = settings(
            r"
rules: []
default_rate: 1.0
max_records_per_minute: 1
max_memory_mib: 1
",
        );
        let mut sampler = AdaptiveSampler::from_settings(&cfg, dbscope_telemetry::MetricsRegistry::new()).unwrap();
        let resource = Resource::default();
        let records = vec![log(None), log(None), log(None)];
        let kept = sampler.sample_items(&resource, records).len();
        assert!(kept <= 1);
    }
}

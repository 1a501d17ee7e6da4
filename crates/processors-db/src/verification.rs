// SPDX-License-Identifier: Apache-2.0

//! Verification (§4.3.6): a final safety net re-scrubbing PII that leaked
//! past upstream receivers/processors, enforcing attribute/metric-name
//! length limits, and checking for required attributes, with a
//! configurable response to violations (correct in place, quarantine the
//! record, or only report it via a metric).

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{AnyBatch, Attributes, LogBody, LogsBatch, Metric, MetricKind, MetricsBatch, TracesBatch};
use dbscope_telemetry::MetricsRegistryHandle;
use regex::Regex;
use serde::Deserialize;

fn default_max_attribute_length() -> usize {
    1024
}

fn default_max_metric_name_length() -> usize {
    255
}

/// How a verification violation is handled once detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationMode {
    /// Fix the record in place (truncate, scrub, drop the bad attribute)
    /// and let it through.
    Correct,
    /// Drop the whole record, counted and logged but not forwarded.
    Quarantine,
    /// Forward the record unmodified; only increment the violation metric.
    Report,
}

/// Configuration for the `verification` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    #[serde(default = "default_max_attribute_length")]
    pub max_attribute_length: usize,
    #[serde(default = "default_max_metric_name_length")]
    pub max_metric_name_length: usize,
    /// Attributes that must be present on the resource or the record.
    #[serde(default)]
    pub required_attributes: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: ViolationMode,
}

fn default_mode() -> ViolationMode {
    ViolationMode::Correct
}

fn pii_regexes() -> Result<Vec<Regex>, Error> {
    Ok(vec![
        Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}")?,
        Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")?,
    ])
}

struct Verdict {
    ok: bool,
    corrected: bool,
}

fn verify_and_correct_attributes(attrs: &mut Attributes, config: &VerificationConfig, pii: &[Regex], required_present: bool) -> Verdict {
    let mut ok = required_present;
    let mut corrected = false;
    let keys: Vec<String> = attrs.iter().map(|(k, _)| k.to_string()).collect();
    for key in keys {
        if let Some(value) = attrs.get(&key).and_then(|v| v.as_str()).map(str::to_string) {
            let mut new_value = value.clone();
            for re in pii {
                if re.is_match(&new_value) {
                    new_value = re.replace_all(&new_value, "<redacted>").into_owned();
                }
            }
            if new_value != value {
                corrected = true;
                attrs.insert(key.clone(), new_value);
            }
        }

        if key.len() > config.max_attribute_length {
            ok = false;
            if config.mode == ViolationMode::Correct {
                if let Some(value) = attrs.remove(&key) {
                    let mut new_key = key.clone();
                    new_key.truncate(config.max_attribute_length);
                    attrs.insert(new_key, value);
                }
                corrected = true;
            }
        }
    }
    Verdict { ok, corrected }
}

/// The `verification` processor.
pub struct Verification {
    config: VerificationConfig,
    pii: Vec<Regex>,
    violations_total: prometheus::CounterVec,
    corrected_total: prometheus::CounterVec,
    quarantined_total: prometheus::CounterVec,
}

impl Verification {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: VerificationConfig = serde_yaml::from_value(settings.clone())?;
        let pii = pii_regexes()?;
        let violations_total = metrics.counter_vec(
            "dbscope_verification_violations_total",
            "Violations detected by the verification processor",
            &["signal"],
        )?;
        let corrected_total = metrics.counter_vec(
            "dbscope_verification_corrected_total",
            "Records corrected in place",
            &["signal"],
        )?;
        let quarantined_total = metrics.counter_vec(
            "dbscope_verification_quarantined_total",
            "Records dropped by quarantine mode",
            &["signal"],
        )?;
        Ok(Self {
            config,
            pii,
            violations_total,
            corrected_total,
            quarantined_total,
        })
    }

    fn required_present(&self, resource_attrs: &Attributes, item_attrs: &Attributes) -> bool {
        self.config
            .required_attributes
            .iter()
            .all(|k| resource_attrs.get(k).is_some() || item_attrs.get(k).is_some())
    }

    fn handle(&mut self, signal: &str, corrected: bool, ok: bool) -> bool {
        if !ok || corrected {
            self.violations_total.with_label_values(&[signal]).inc();
        }
        if corrected {
            self.corrected_total.with_label_values(&[signal]).inc();
        }
        let keep = match self.config.mode {
            ViolationMode::Correct | ViolationMode::Report => true,
            ViolationMode::Quarantine => ok && !corrected,
        };
        if !keep {
            self.quarantined_total.with_label_values(&[signal]).inc();
        }
        keep
    }

    fn process_metrics(&mut self, mut batch: MetricsBatch) -> MetricsBatch {
        for rs in &mut batch.resource_sets {
            let resource_attrs = rs.resource.attributes().clone();
            for scope in &mut rs.scopes {
                scope.items.retain_mut(|metric: &mut Metric| {
                    let name_ok = metric.name.len() <= self.config.max_metric_name_length;
                    if !name_ok && self.config.mode == ViolationMode::Correct {
                        metric.name.truncate(self.config.max_metric_name_length);
                    }
                    let mut any_corrected = !name_ok && self.config.mode == ViolationMode::Correct;
                    let mut any_ok = name_ok;
                    let points_attrs: Vec<&mut Attributes> = match &mut metric.kind {
                        MetricKind::Gauge(p) => p.iter_mut().map(|d| &mut d.attributes).collect(),
                        MetricKind::Sum { points, .. } => points.iter_mut().map(|d| &mut d.attributes).collect(),
                        MetricKind::Histogram(p) => p.iter_mut().map(|d| &mut d.attributes).collect(),
                        MetricKind::ExponentialHistogram(p) => p.iter_mut().map(|d| &mut d.attributes).collect(),
                        MetricKind::Summary(p) => p.iter_mut().map(|d| &mut d.attributes).collect(),
                    };
                    for point_attrs in points_attrs {
                        let required_present = self.required_present(&resource_attrs, point_attrs);
                        let verdict = verify_and_correct_attributes(point_attrs, &self.config, &self.pii, required_present);
                        any_ok &= verdict.ok;
                        any_corrected |= verdict.corrected;
                    }
                    self.handle("metrics", any_corrected, any_ok)
                });
            }
        }
        batch
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        for rs in &mut batch.resource_sets {
            let resource_attrs = rs.resource.attributes().clone();
            for scope in &mut rs.scopes {
                scope.items.retain_mut(|record| {
                    let required_present = self.required_present(&resource_attrs, &record.attributes);
                    let mut verdict = verify_and_correct_attributes(&mut record.attributes, &self.config, &self.pii, required_present);
                    let body = record.body.as_str().to_string();
                    let mut new_body = body.clone();
                    for re in &self.pii {
                        if re.is_match(&new_body) {
                            new_body = re.replace_all(&new_body, "<redacted>").into_owned();
                        }
                    }
                    if new_body != body {
                        record.body = LogBody::String(new_body);
                        verdict.corrected = true;
                    }
                    self.handle("logs", verdict.corrected, verdict.ok)
                });
            }
        }
        batch
    }

    fn process_traces(&mut self, mut batch: TracesBatch) -> TracesBatch {
        for rs in &mut batch.resource_sets {
            let resource_attrs = rs.resource.attributes().clone();
            for scope in &mut rs.scopes {
                scope.items.retain_mut(|span| {
                    let required_present = self.required_present(&resource_attrs, &span.attributes);
                    let verdict = verify_and_correct_attributes(&mut span.attributes, &self.config, &self.pii, required_present);
                    self.handle("traces", verdict.corrected, verdict.ok)
                });
            }
        }
        batch
    }
}

#[async_trait]
impl Processor for Verification {
    async fn process(
        &mut self,
        data: AnyBatch,
        effect_handler: &EffectHandler,
    ) -> Result<ConsumeOutcome, dbscope_engine::Error> {
        let out = match data {
            AnyBatch::Metrics(batch) => AnyBatch::Metrics(self.process_metrics(batch)),
            AnyBatch::Logs(batch) => AnyBatch::Logs(self.process_logs(batch)),
            AnyBatch::Traces(batch) => AnyBatch::Traces(self.process_traces(batch)),
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

    fn config(mode: ViolationMode) -> VerificationConfig {
        VerificationConfig {
            max_attribute_length: 16,
            max_metric_name_length: 255,
            required_attributes: vec!["db.system".to_string()],
            mode,
        }
    }

    #[test]
    fn pii_in_attribute_value_is_redacted() {
        let pii = pii_regexes().unwrap();
        let cfg = config(ViolationMode::Correct);
        let mut attrs = Attributes::new().with("user.email", "alice@example.com");
        let verdict = verify_and_correct_attributes(&mut attrs, &cfg, &pii, true);
        assert!(verdict.corrected);
        assert_eq!(attrs.get("user.email").unwrap().as_str(), Some("<redacted>"));
    }

    #[test]
    fn overlong_attribute_value_is_left_untouched() {
        let pii = pii_regexes().unwrap();
        let cfg = config(ViolationMode::Correct);
        let mut attrs = Attributes::new().with("note", "0123456789abcdefGHIJ");
        let verdict = verify_and_correct_attributes(&mut attrs, &cfg, &pii, true);
        assert!(!verdict.corrected);
        assert!(verdict.ok);
        assert_eq!(attrs.get("note").unwrap().as_str().unwrap().len(), 20);
    }

    #[test]
    fn overlong_attribute_name_is_truncated_and_flagged() {
        let pii = pii_regexes().unwrap();
        let cfg = config(ViolationMode::Correct);
        let long_key = "a".repeat(20);
        let mut attrs = Attributes::new().with(long_key.as_str(), "x");
        let verdict = verify_and_correct_attributes(&mut attrs, &cfg, &pii, true);
        assert!(verdict.corrected);
        assert!(!verdict.ok);
        assert!(attrs.get(&long_key).is_none());
        assert_eq!(attrs.get(&"a".repeat(16)).and_then(|v| v.as_str()), Some("x"));
    }

    #[test]
    fn overlong_attribute_name_is_flagged_without_correction_in_report_mode() {
        let pii = pii_regexes().unwrap();
        let cfg = config(ViolationMode::Report);
        let long_key = "a".repeat(20);
        let mut attrs = Attributes::new().with(long_key.as_str(), "x");
        let verdict = verify_and_correct_attributes(&mut attrs, &cfg, &pii, true);
        assert!(!verdict.corrected);
        assert!(!verdict.ok);
        assert!(attrs.get(&long_key).is_some());
    }

    #[test]
    fn missing_required_attribute_is_flagged_not_ok() {
        let pii = pii_regexes().unwrap();
        let cfg = config(ViolationMode::Correct);
        let mut attrs = Attributes::new().with("unrelated", "x");
        let verdict = verify_and_correct_attributes(&mut attrs, &cfg, &pii, false);
        assert!(!verdict.ok);
    }
}

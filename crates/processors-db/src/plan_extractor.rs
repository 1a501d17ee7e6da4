// SPDX-License-Identifier: Apache-2.0

//! Plan attribute extractor (§4.3.3): pulls canonical attributes out of a
//! `db.plan.text` log body (`EXPLAIN`/`EXPLAIN (FORMAT JSON)` output),
//! scrubs PII from literals, flags anti-patterns, and deduplicates repeat
//! emission of the same plan shape via a literal-invariant hash.

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{AnyBatch, LogBody, LogsBatch};
use dbscope_telemetry::MetricsRegistryHandle;
use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

fn default_plan_body_attribute() -> String {
    "db.plan.text".to_string()
}

fn default_query_id_attribute() -> String {
    "db.query.id".to_string()
}

fn default_plan_cache_size() -> usize {
    4096
}

fn default_plan_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Configuration for the `plan_extractor` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanExtractorConfig {
    /// Log attribute holding the raw plan text or JSON.
    #[serde(default = "default_plan_body_attribute")]
    pub plan_body_attribute: String,
    /// Log attribute identifying the query the plan belongs to; used
    /// together with `plan_hash` to key the dedup cache.
    #[serde(default = "default_query_id_attribute")]
    pub query_id_attribute: String,
    /// Maximum distinct `(query_id, plan_hash)` pairs tracked.
    #[serde(default = "default_plan_cache_size")]
    pub plan_cache_size: usize,
    /// How long a plan shape is remembered before its full body is
    /// re-emitted even if unchanged.
    #[serde(default = "default_plan_cache_ttl", with = "humantime_serde")]
    pub plan_cache_ttl: Duration,
}

/// An anti-pattern flagged in a parsed plan (§4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiPattern {
    SeqScan,
    NestedLoop,
    SortSpillsToDisk,
    HashJoinSpill,
}

impl AntiPattern {
    fn as_str(self) -> &'static str {
        match self {
            AntiPattern::SeqScan => "seq_scan",
            AntiPattern::NestedLoop => "nested_loop",
            AntiPattern::SortSpillsToDisk => "sort_spill",
            AntiPattern::HashJoinSpill => "hash_join_spill",
        }
    }
}

/// Canonical attributes pulled out of a plan body.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAttributes {
    pub root_node_type: String,
    pub total_cost: Option<f64>,
    pub estimated_rows: Option<f64>,
    pub anti_patterns: Vec<AntiPattern>,
    /// Hash of the plan shape that ignores literal values and row/cost
    /// estimates, so semantically identical plans with different bind
    /// values or up-to-date statistics hash identically.
    pub plan_hash: String,
}

struct PiiPattern {
    name: &'static str,
    regex: Regex,
}

fn pii_patterns() -> Result<Vec<PiiPattern>, Error> {
    let specs: &[(&str, &str)] = &[
        ("email", r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}"),
        ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        ("credit_card", r"\b(?:\d[ -]?){13,16}\b"),
        ("phone", r"\b\+?\d{1,3}[ -]?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b"),
        ("ipv4", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
        ("ipv6", r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b"),
    ];
    specs
        .iter()
        .map(|(name, pattern)| Ok(PiiPattern { name, regex: Regex::new(pattern)? }))
        .collect()
}

static QUOTED_LITERAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"'[^']*'").expect("valid regex"));
static COST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(cost=[^)]*\)").expect("valid regex"));
static ROWS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"rows=\d+").expect("valid regex"));
static LOOPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"loops=\d+").expect("valid regex"));
static WIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"width=\d+").expect("valid regex"));

fn sanitize_literals(text: &str, patterns: &[PiiPattern]) -> String {
    let mut out = text.to_string();
    for p in patterns {
        out = p.regex.replace_all(&out, format!("<{}>", p.name)).into_owned();
    }
    // Remaining quoted string/numeric literals that aren't PII are still
    // replaced so the plan-hash input (and the sanitized body we keep) is
    // literal-invariant.
    out = QUOTED_LITERAL_RE.replace_all(&out, "'?'").into_owned();
    out
}

/// Canonicalizes a plan for hashing: strips cost/row estimates and any
/// literal the PII/quote patterns caught, leaving only node shape.
fn canonicalize_for_hash(text: &str, patterns: &[PiiPattern]) -> String {
    let sanitized = sanitize_literals(text, patterns);
    let mut canon = COST_RE.replace_all(&sanitized, "").into_owned();
    canon = ROWS_RE.replace_all(&canon, "").into_owned();
    canon = LOOPS_RE.replace_all(&canon, "").into_owned();
    canon = WIDTH_RE.replace_all(&canon, "").into_owned();
    canon.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_root_node_type(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| {
            let trimmed = l.trim_start_matches(|c: char| c == '-' || c == '>' || c.is_whitespace());
            trimmed.split(' ').next()
        })
        .unwrap_or("Unknown")
        .to_string()
}

fn extract_f64_after(text: &str, marker: &str, terminator: char) -> Option<f64> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find(terminator).unwrap_or(rest.len());
    rest[..end].trim().parse().ok()
}

fn detect_anti_patterns(text: &str) -> Vec<AntiPattern> {
    let mut found = Vec::new();
    if text.contains("Seq Scan") {
        found.push(AntiPattern::SeqScan);
    }
    if text.contains("Nested Loop") {
        found.push(AntiPattern::NestedLoop);
    }
    if text.to_lowercase().contains("sort method") && text.to_lowercase().contains("disk") {
        found.push(AntiPattern::SortSpillsToDisk);
    }
    if text.to_lowercase().contains("hash") && text.to_lowercase().contains("batches") {
        found.push(AntiPattern::HashJoinSpill);
    }
    found
}

/// Parses a plan body (JSON or textual `EXPLAIN` output) into canonical
/// attributes, scrubbing PII literals before they enter the hash or any
/// retained text.
pub fn extract(body: &str, patterns: &[PiiPattern]) -> PlanAttributes {
    let sanitized = sanitize_literals(body, patterns);
    let root_node_type = if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        json_root_node_type(&json).unwrap_or_else(|| extract_root_node_type(&sanitized))
    } else {
        extract_root_node_type(&sanitized)
    };
    let total_cost = extract_f64_after(&sanitized, "cost=0.00..", ' ')
        .or_else(|| extract_f64_after(&sanitized, "cost=", ' '));
    let estimated_rows = extract_f64_after(&sanitized, "rows=", ' ');
    let anti_patterns = detect_anti_patterns(&sanitized);
    let plan_hash = blake3::hash(canonicalize_for_hash(body, patterns).as_bytes())
        .to_hex()
        .to_string();
    PlanAttributes {
        root_node_type,
        total_cost,
        estimated_rows,
        anti_patterns,
        plan_hash,
    }
}

fn json_root_node_type(value: &serde_json::Value) -> Option<String> {
    let plan = value
        .get("Plan")
        .or_else(|| value.as_array().and_then(|a| a.first()).and_then(|v| v.get("Plan")))?;
    plan.get("Node Type").and_then(|v| v.as_str()).map(str::to_string)
}

/// The `plan_extractor` processor.
pub struct PlanExtractor {
    config: PlanExtractorConfig,
    patterns: Vec<PiiPattern>,
    cache: LruCache<String, Instant>,
    extracted_total: prometheus::CounterVec,
    anti_pattern_total: prometheus::CounterVec,
    dedup_suppressed_total: prometheus::CounterVec,
}

impl PlanExtractor {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: PlanExtractorConfig = serde_yaml::from_value(settings.clone())?;
        let patterns = pii_patterns()?;
        let cache_size = NonZeroUsize::new(config.plan_cache_size.max(1)).unwrap();
        let extracted_total = metrics.counter_vec(
            "dbscope_plan_extractor_extracted_total",
            "Plans extracted",
            &["root_node_type"],
        )?;
        let anti_pattern_total = metrics.counter_vec(
            "dbscope_plan_extractor_anti_pattern_total",
            "Anti-patterns detected",
            &["pattern"],
        )?;
        let dedup_suppressed_total = metrics.counter_vec(
            "dbscope_plan_extractor_dedup_suppressed_total",
            "Repeat plan bodies suppressed by the plan cache",
            &[],
        )?;
        Ok(Self {
            config,
            patterns,
            cache: LruCache::new(cache_size),
            extracted_total,
            anti_pattern_total,
            dedup_suppressed_total,
        })
    }

    fn should_emit_full_body(&mut self, query_id: &str, plan_hash: &str) -> bool {
        let key = format!("{query_id}:{plan_hash}");
        let now = Instant::now();
        if let Some(last) = self.cache.get(&key) {
            if now.duration_since(*last) < self.config.plan_cache_ttl {
                self.dedup_suppressed_total.with_label_values(&[]).inc();
                self.cache.put(key, now);
                return false;
            }
        }
        self.cache.put(key, now);
        true
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        for rs in &mut batch.resource_sets {
            for scope in &mut rs.scopes {
                for record in &mut scope.items {
                    let raw = record.body.as_str().to_string();
                    if raw.is_empty() {
                        continue;
                    }
                    let plan_body = record
                        .attributes
                        .get(&self.config.plan_body_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or(raw);

                    let attrs = extract(&plan_body, &self.patterns);
                    self.extracted_total
                        .with_label_values(&[&attrs.root_node_type])
                        .inc();
                    for ap in &attrs.anti_patterns {
                        self.anti_pattern_total.with_label_values(&[ap.as_str()]).inc();
                    }

                    record.attributes.insert("db.plan.root_node_type", attrs.root_node_type.clone());
                    if let Some(cost) = attrs.total_cost {
                        record.attributes.insert("db.plan.total_cost", cost);
                    }
                    if let Some(rows) = attrs.estimated_rows {
                        record.attributes.insert("db.plan.estimated_rows", rows);
                    }
                    record.attributes.insert("db.plan.hash", attrs.plan_hash.clone());
                    if !attrs.anti_patterns.is_empty() {
                        record.attributes.insert(
                            "db.plan.anti_patterns",
                            attrs
                                .anti_patterns
                                .iter()
                                .map(|p| p.as_str())
                                .collect::<Vec<_>>()
                                .join(","),
                        );
                    }

                    let query_id = record
                        .attributes
                        .get(&self.config.query_id_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| "unknown".to_string());

                    if self.should_emit_full_body(&query_id, &attrs.plan_hash) {
                        record.body = LogBody::String(sanitize_literals(&plan_body, &self.patterns));
                    } else {
                        record.attributes.remove(&self.config.plan_body_attribute);
                        record.body = LogBody::String(String::new());
                    }
                }
            }
        }
        batch
    }
}

#[async_trait]
impl Processor for PlanExtractor {
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

    #[test]
    fn plan_hash_is_invariant_to_literal_values_and_row_estimates() {
        let patterns = pii_patterns().unwrap();
        let a = extract(
            "Seq Scan on users (cost=0.00..12.50 rows=100 width=40) WHERE email = 'alice@example.com'",
            &patterns,
        );
        let b = extract(
            "Seq Scan on users (cost=0.00..18.75 rows=250 width=40) WHERE email = 'bob@corp.io'",
            &patterns,
        );
        assert_eq!(a.plan_hash, b.plan_hash);
        assert_eq!(a.root_node_type, "Seq");
        assert!(a.anti_patterns.contains(&AntiPattern::SeqScan));
    }

    #[test]
    fn pii_literals_are_scrubbed_from_sanitized_body() {
        let patterns = pii_patterns().unwrap();
        let sanitized = sanitize_literals("WHERE email = 'alice@example.com' AND ssn = '123-45-6789'", &patterns);
        assert!(!sanitized.contains("alice@example.com"));
        assert!(!sanitized.contains("123-45-6789"));
    }

    #[test]
    fn nested_loop_and_disk_sort_are_flagged() {
        let patterns = pii_patterns().unwrap();
        let attrs = extract(
            "Nested Loop (cost=0.00..99.00 rows=10 width=8)\n  Sort Method: external merge  Disk: 4096kB",
            &patterns,
        );
        assert!(attrs.anti_patterns.contains(&AntiPattern::NestedLoop));
        assert!(attrs.anti_patterns.contains(&AntiPattern::SortSpillsToDisk));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Query correlator (§4.3.5): an in-memory, TTL-bounded index of recent
//! queries keyed by `(query_id, table, database)`, used to categorize
//! records by leading keyword and execution-time bucket, and to compute
//! each table's share of load within its database so downstream consumers
//! can see which queries are contending for a given table.

use crate::error::Error;
use async_trait::async_trait;
use dbscope_engine::{ConsumeOutcome, EffectHandler, Processor};
use dbscope_pdata::{AnyBatch, LogsBatch};
use dbscope_telemetry::MetricsRegistryHandle;
use lru::LruCache;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_queries_tracked() -> usize {
    10_000
}

fn default_query_id_attribute() -> String {
    "db.query.id".to_string()
}

fn default_table_attribute() -> String {
    "db.sql.table".to_string()
}

fn default_database_attribute() -> String {
    "db.name".to_string()
}

fn default_execution_time_attribute() -> String {
    "db.query.mean_time_ms".to_string()
}

/// Configuration for the `query_correlator` processor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCorrelatorConfig {
    #[serde(default = "default_query_id_attribute")]
    pub query_id_attribute: String,
    #[serde(default = "default_table_attribute")]
    pub table_attribute: String,
    #[serde(default = "default_database_attribute")]
    pub database_attribute: String,
    #[serde(default = "default_execution_time_attribute")]
    pub execution_time_attribute: String,
    /// How often stale entries are swept out of the index.
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Entries older than this are considered stale at sweep time.
    #[serde(with = "humantime_serde")]
    pub query_ttl: Duration,
    /// Maximum distinct queries tracked; oldest entries are evicted first.
    #[serde(default = "default_max_queries_tracked")]
    pub max_queries_tracked: usize,
}

/// Execution-time buckets used to categorize a query (§4.3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedCategory {
    Fast,
    Moderate,
    Slow,
    VerySlow,
}

impl SpeedCategory {
    fn of(mean_time_ms: f64) -> Self {
        if mean_time_ms < 10.0 {
            SpeedCategory::Fast
        } else if mean_time_ms < 100.0 {
            SpeedCategory::Moderate
        } else if mean_time_ms < 1000.0 {
            SpeedCategory::Slow
        } else {
            SpeedCategory::VerySlow
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SpeedCategory::Fast => "fast",
            SpeedCategory::Moderate => "moderate",
            SpeedCategory::Slow => "slow",
            SpeedCategory::VerySlow => "very_slow",
        }
    }
}

/// Leading-keyword category (§4.3.5): maintenance/transaction/analytical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    /// DDL and housekeeping statements (`VACUUM`, `ALTER`, `CREATE`, ...).
    Maintenance,
    /// Row-mutating DML (`INSERT`, `UPDATE`, `DELETE`, ...).
    Transaction,
    /// Read statements (`SELECT`, `WITH`) and anything else unrecognized.
    Analytical,
}

impl QueryCategory {
    /// Classifies a statement by its leading keyword. Falls back to
    /// `Analytical` for `SELECT`/`WITH` and for any statement whose
    /// leading keyword isn't recognized.
    fn of(statement: &str) -> Self {
        let keyword = statement
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match keyword.as_str() {
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "UPSERT" => QueryCategory::Transaction,
            "VACUUM" | "ANALYZE" | "REINDEX" | "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "CLUSTER" | "REFRESH"
            | "GRANT" | "REVOKE" => QueryCategory::Maintenance,
            _ => QueryCategory::Analytical,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            QueryCategory::Maintenance => "maintenance",
            QueryCategory::Transaction => "transaction",
            QueryCategory::Analytical => "analytical",
        }
    }
}

struct QueryEntry {
    table: String,
    database: String,
    mean_time_ms: f64,
    last_seen: Instant,
}

/// The live query index plus per-table load accounting, independently
/// testable without the processor's channel plumbing.
pub struct CorrelatorIndex {
    config: QueryCorrelatorConfig,
    queries: LruCache<String, QueryEntry>,
    last_cleanup: Instant,
}

impl CorrelatorIndex {
    fn new(config: QueryCorrelatorConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_queries_tracked.max(1)).unwrap();
        Self {
            config,
            queries: LruCache::new(capacity),
            last_cleanup: Instant::now(),
        }
    }

    /// Records (or refreshes) a query observation.
    pub fn observe(&mut self, query_id: &str, table: &str, database: &str, mean_time_ms: f64) {
        self.queries.put(
            query_id.to_string(),
            QueryEntry {
                table: table.to_string(),
                database: database.to_string(),
                mean_time_ms,
                last_seen: Instant::now(),
            },
        );
    }

    /// Sweeps entries untouched for longer than `query_ttl`, if
    /// `cleanup_interval` has elapsed since the last sweep.
    pub fn maybe_cleanup(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_cleanup) < self.config.cleanup_interval {
            return;
        }
        self.last_cleanup = now;
        let stale: Vec<String> = self
            .queries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_seen) > self.config.query_ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            let _ = self.queries.pop(&key);
        }
    }

    /// Fraction of all tracked execution time within `database` attributable
    /// to `table` (§4.3.5's "table-level load contribution").
    #[must_use]
    pub fn table_load_fraction(&self, database: &str, table: &str) -> f64 {
        let mut table_total = 0.0;
        let mut db_total = 0.0;
        for (_, entry) in self.queries.iter() {
            if entry.database != database {
                continue;
            }
            db_total += entry.mean_time_ms;
            if entry.table == table {
                table_total += entry.mean_time_ms;
            }
        }
        if db_total <= 0.0 {
            0.0
        } else {
            table_total / db_total
        }
    }

    /// Number of distinct queries tracked against `database`.
    #[must_use]
    pub fn queries_in_database(&self, database: &str) -> usize {
        self.queries.iter().filter(|(_, e)| e.database == database).count()
    }
}

/// The `query_correlator` processor.
pub struct QueryCorrelator {
    index: CorrelatorIndex,
    categorized_total: prometheus::CounterVec,
}

impl QueryCorrelator {
    /// Builds a processor from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: QueryCorrelatorConfig = serde_yaml::from_value(settings.clone())?;
        let categorized_total = metrics.counter_vec(
            "dbscope_query_correlator_categorized_total",
            "Records categorized by execution-time bucket",
            &["category"],
        )?;
        Ok(Self {
            index: CorrelatorIndex::new(config),
            categorized_total,
        })
    }

    fn process_logs(&mut self, mut batch: LogsBatch) -> LogsBatch {
        self.index.maybe_cleanup();
        for rs in &mut batch.resource_sets {
            let db_from_resource = rs
                .resource
                .get(&self.index.config.database_attribute)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            for scope in &mut rs.scopes {
                for record in &mut scope.items {
                    let query_id = record
                        .attributes
                        .get(&self.index.config.query_id_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    let table = record
                        .attributes
                        .get(&self.index.config.table_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| "unknown".to_string());
                    let database = record
                        .attributes
                        .get(&self.index.config.database_attribute)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| db_from_resource.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    let mean_time_ms = record
                        .attributes
                        .get(&self.index.config.execution_time_attribute)
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0);

                    if let Some(qid) = &query_id {
                        self.index.observe(qid, &table, &database, mean_time_ms);
                    }

                    let category = SpeedCategory::of(mean_time_ms);
                    self.categorized_total.with_label_values(&[category.as_str()]).inc();
                    record.attributes.insert("db.query.speed_category", category.as_str());
                    record
                        .attributes
                        .insert("db.query.category", QueryCategory::of(record.body.as_str()).as_str());
                    record.attributes.insert(
                        "db.table.load_fraction",
                        self.index.table_load_fraction(&database, &table),
                    );
                    record.attributes.insert(
                        "db.database.tracked_query_count",
                        self.index.queries_in_database(&database) as i64,
                    );
                }
            }
        }
        batch
    }
}

#[async_trait]
impl Processor for QueryCorrelator {
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

    fn cfg() -> QueryCorrelatorConfig {
        QueryCorrelatorConfig {
            query_id_attribute: "db.query.id".to_string(),
            table_attribute: "db.sql.table".to_string(),
            database_attribute: "db.name".to_string(),
            execution_time_attribute: "db.query.mean_time_ms".to_string(),
            cleanup_interval: Duration::from_secs(60),
            query_ttl: Duration::from_millis(20),
            max_queries_tracked: 100,
        }
    }

    #[test]
    fn speed_category_buckets() {
        assert!(matches!(SpeedCategory::of(1.0), SpeedCategory::Fast));
        assert!(matches!(SpeedCategory::of(50.0), SpeedCategory::Moderate));
        assert!(matches!(SpeedCategory::of(500.0), SpeedCategory::Slow));
        assert!(matches!(SpeedCategory::of(5000.0), SpeedCategory::VerySlow));
    }

    #[test]
    fn query_category_classifies_by_leading_keyword() {
        assert!(matches!(QueryCategory::of("select * from orders"), QueryCategory::Analytical));
        assert!(matches!(QueryCategory::of("  WITH x AS (SELECT 1) SELECT * FROM x"), QueryCategory::Analytical));
        assert!(matches!(QueryCategory::of("INSERT INTO orders VALUES (?)"), QueryCategory::Transaction));
        assert!(matches!(QueryCategory::of("UPDATE orders SET x = 1"), QueryCategory::Transaction));
        assert!(matches!(QueryCategory::of("VACUUM ANALYZE orders"), QueryCategory::Maintenance));
        assert!(matches!(QueryCategory::of("ALTER TABLE orders ADD COLUMN x int"), QueryCategory::Maintenance));
    }

    #[test]
    fn table_load_fraction_reflects_relative_execution_time() {
        let mut index = CorrelatorIndex::new(cfg());
        index.observe("q1", "orders", "shop", 90.0);
        index.observe("q2", "users", "shop", 10.0);
        assert!((index.table_load_fraction("shop", "orders") - 0.9).abs() < 1e-9);
        assert!((index.table_load_fraction("shop", "users") - 0.1).abs() < 1e-9);
        assert_eq!(index.table_load_fraction("other_db", "orders"), 0.0);
    }

    #[test]
    fn stale_entries_are_swept_after_ttl_and_cleanup_interval() {
        let mut config = cfg();
        config.cleanup_interval = Duration::from_millis(0);
        let mut index = CorrelatorIndex::new(config);
        index.observe("q1", "orders", "shop", 10.0);
        std::thread::sleep(Duration::from_millis(30));
        index.maybe_cleanup();
        assert_eq!(index.queries_in_database("shop"), 0);
    }
}

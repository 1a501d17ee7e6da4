// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL receiver (§4.1): `pg_stat_bgwriter`/`pg_stat_database` counter
//! deltas as metrics, and — when `pg_stat_statements` is installed — slow
//! query capture as obfuscated log records.

use crate::delta_cache::DeltaCache;
use crate::error::Error;
use crate::obfuscator::obfuscate;
use crate::scheduler::{TickOutcome, TickScheduler};
use async_trait::async_trait;
use dbscope_engine::{ControlChannel, EffectHandler, ReceiverErrorKind, TerminalState};
use dbscope_pdata::{
    now, AnyBatch, Attributes, LogBody, LogRecord, LogsBatch, Metric, MetricKind, MetricsBatch,
    NumberDataPoint, NumberValue, Resource, ResourceSet, Scope, Severity, Temporality,
};
use dbscope_telemetry::{info, warn, MetricsRegistryHandle};
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::NoTls;

const SCOPE_NAME: &str = "dbscope/postgresqlreceiver";
const SCOPE_VERSION: &str = "0.1.0";

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_slow_query_threshold() -> Duration {
    Duration::from_millis(500)
}

fn default_top_n() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// Which signal this receiver instance produces. A single receiver is
/// referenced from either a `metrics/...` or `logs/...` pipeline (§6); the
/// configured `signal` must agree with where it's wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverSignal {
    /// Emits `pg_stat_bgwriter`/`pg_stat_database` counter deltas.
    Metrics,
    /// Emits obfuscated slow-query log records.
    Logs,
}

/// Configuration for the `postgresql` receiver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    /// `libpq`-style connection string or URI.
    pub connection_string: String,
    /// How often to scrape (§4.2). Clamped to a minimum of 1s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub collection_interval: Duration,
    /// Which signal this instance emits.
    pub signal: ReceiverSignal,
    /// Whether to attempt slow-query capture via `pg_stat_statements`.
    #[serde(default = "default_true")]
    pub enable_pg_stat_statements: bool,
    /// Minimum mean execution time for a query to be captured.
    #[serde(default = "default_slow_query_threshold", with = "humantime_serde")]
    pub slow_query_threshold: Duration,
    /// Maximum number of statements captured per scrape.
    #[serde(default = "default_top_n")]
    pub top_n_queries: usize,
    /// Delta-cache capacity, bounding memory for counter history (§4.2).
    #[serde(default = "default_delta_cache_capacity")]
    pub delta_cache_capacity: usize,
}

fn default_delta_cache_capacity() -> usize {
    4096
}

/// The `postgresql` receiver.
pub struct PostgresReceiver {
    config: PostgresConfig,
    metrics: MetricsRegistryHandle,
    deltas: DeltaCache,
    pg_stat_statements_available: Option<bool>,
}

impl PostgresReceiver {
    /// Builds a receiver from its raw settings value.
    pub fn from_settings(settings: &serde_yaml::Value, metrics: MetricsRegistryHandle) -> Result<Self, Error> {
        let config: PostgresConfig = serde_yaml::from_value(settings.clone())?;
        let deltas = DeltaCache::new(config.delta_cache_capacity);
        Ok(Self {
            config,
            metrics,
            deltas,
            pg_stat_statements_available: None,
        })
    }

    async fn detect_pg_stat_statements(&mut self, client: &tokio_postgres::Client) -> bool {
        if let Some(available) = self.pg_stat_statements_available {
            return available;
        }
        let available = client
            .query_opt(
                "SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements'",
                &[],
            )
            .await
            .ok()
            .flatten()
            .is_some();
        if !available {
            warn!("pg_stat_statements extension not installed; slow query capture disabled");
        }
        self.pg_stat_statements_available = Some(available);
        available
    }

    async fn scrape_metrics(&mut self, client: &tokio_postgres::Client) -> Result<MetricsBatch, Error> {
        let time = now();
        let resource = Resource::new(
            Attributes::new()
                .with("db.system", "postgresql")
                .with("dbscope.receiver", "postgresql"),
        );
        let mut scope: Scope<Metric> = Scope::new(SCOPE_NAME, SCOPE_VERSION);

        if let Some(row) = client
            .query_opt(
                "SELECT checkpoints_timed, checkpoints_req, buffers_checkpoint, \
                 buffers_clean, buffers_backend, maxwritten_clean \
                 FROM pg_stat_bgwriter",
                &[],
            )
            .await?
        {
            for (name, idx) in [
                ("db.bgwriter.checkpoints_timed", 0usize),
                ("db.bgwriter.checkpoints_requested", 1),
                ("db.bgwriter.buffers_checkpoint", 2),
                ("db.bgwriter.buffers_clean", 3),
                ("db.bgwriter.buffers_backend", 4),
                ("db.bgwriter.maxwritten_clean", 5),
            ] {
                let value: i64 = row.get(idx);
                if let Some(metric) = self.delta_counter(name, "{buffers}", &Attributes::new(), value as f64, time)
                {
                    scope = scope.with_item(metric);
                }
            }
        }

        let rows = client
            .query(
                "SELECT datname, xact_commit, xact_rollback, blks_hit, blks_read, \
                 tup_returned, tup_fetched, tup_inserted, tup_updated, tup_deleted \
                 FROM pg_stat_database WHERE datname IS NOT NULL",
                &[],
            )
            .await?;
        for row in rows {
            let datname: String = row.get(0);
            let attrs = Attributes::new().with("db.name", datname.as_str());
            for (name, idx) in [
                ("db.transactions.committed", 1usize),
                ("db.transactions.rolled_back", 2),
                ("db.cache.hits", 3),
                ("db.disk.reads", 4),
                ("db.rows.returned", 5),
                ("db.rows.fetched", 6),
                ("db.rows.inserted", 7),
                ("db.rows.updated", 8),
                ("db.rows.deleted", 9),
            ] {
                let value: i64 = row.get(idx);
                if let Some(metric) = self.delta_counter(name, "{rows}", &attrs, value as f64, time) {
                    scope = scope.with_item(metric);
                }
            }
        }

        let mut resource_set = ResourceSet::new(resource);
        resource_set
            .push_scope(scope)
            .expect("single scope, no duplicate identity possible");
        Ok(MetricsBatch {
            resource_sets: vec![resource_set],
        })
    }

    fn delta_counter(
        &mut self,
        name: &str,
        unit: &str,
        point_attrs: &Attributes,
        value: f64,
        time: std::time::SystemTime,
    ) -> Option<Metric> {
        let resource = Resource::default();
        let identity = dbscope_pdata::SeriesIdentity::new(&resource, SCOPE_NAME, SCOPE_VERSION, name, point_attrs);
        let delta = self.deltas.observe(&identity, value, time)?;
        Some(Metric {
            name: name.to_string(),
            unit: unit.to_string(),
            description: String::new(),
            kind: MetricKind::Sum {
                points: vec![NumberDataPoint {
                    start_time: Some(time - Duration::from_secs_f64(delta.elapsed_secs)),
                    time,
                    attributes: point_attrs.clone(),
                    value: NumberValue::Double(delta.delta),
                }],
                temporality: Temporality::Delta,
                monotonic: true,
            },
        })
    }

    async fn scrape_slow_queries(&mut self, client: &tokio_postgres::Client) -> Result<Vec<LogRecord>, Error> {
        if !self.config.enable_pg_stat_statements {
            return Ok(Vec::new());
        }
        if !self.detect_pg_stat_statements(client).await {
            return Ok(Vec::new());
        }
        let threshold_ms = self.config.slow_query_threshold.as_secs_f64() * 1000.0;
        let rows = client
            .query(
                "SELECT query, calls, total_exec_time, mean_exec_time \
                 FROM pg_stat_statements WHERE mean_exec_time >= $1 \
                 ORDER BY mean_exec_time DESC LIMIT $2",
                &[&threshold_ms, &(self.config.top_n_queries as i64)],
            )
            .await?;
        let time = now();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_query: String = row.get(0);
            let calls: i64 = row.get(1);
            let total_exec_time: f64 = row.get(2);
            let mean_exec_time: f64 = row.get(3);
            let obfuscated = obfuscate(&raw_query);
            let attributes = Attributes::new()
                .with("db.statement.fingerprint", obfuscated.fingerprint.as_str())
                .with("db.statement.calls", calls)
                .with("db.statement.total_time_ms", total_exec_time)
                .with("db.statement.mean_time_ms", mean_exec_time);
            records.push(LogRecord {
                time,
                severity: Severity::INFO,
                body: LogBody::String(obfuscated.text),
                attributes,
                trace_id: None,
                span_id: None,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl dbscope_engine::Receiver for PostgresReceiver {
    async fn start(
        &mut self,
        mut ctrl: ControlChannel,
        effect_handler: EffectHandler,
    ) -> Result<TerminalState, dbscope_engine::Error> {
        let node = effect_handler.node_id().clone();
        let (client, connection) = tokio_postgres::connect(&self.config.connection_string, NoTls)
            .await
            .map_err(|e| Error::Postgres(e).into_engine_error(node.clone(), ReceiverErrorKind::Connect))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgresql connection task ended");
            }
        });
        info!(connection = %self.config.connection_string, "postgresql receiver connected");

        let mut scheduler = TickScheduler::new("postgresql", self.config.collection_interval, &self.metrics);
        loop {
            match scheduler.wait(&mut ctrl).await {
                TickOutcome::Shutdown => break,
                TickOutcome::Scrape => {}
            }
            let result = match self.config.signal {
                ReceiverSignal::Metrics => self
                    .scrape_metrics(&client)
                    .await
                    .map(|batch| (!batch.is_empty()).then(|| AnyBatch::Metrics(batch))),
                ReceiverSignal::Logs => self.scrape_slow_queries(&client).await.map(|records| {
                    (!records.is_empty()).then(|| {
                        let mut scope: Scope<LogRecord> = Scope::new(SCOPE_NAME, SCOPE_VERSION);
                        for record in records {
                            scope = scope.with_item(record);
                        }
                        let mut resource_set = ResourceSet::new(Resource::new(
                            Attributes::new().with("db.system", "postgresql"),
                        ));
                        resource_set
                            .push_scope(scope)
                            .expect("single scope, no duplicate identity possible");
                        AnyBatch::Logs(LogsBatch {
                            resource_sets: vec![resource_set],
                        })
                    })
                }),
            };
            match result {
                Ok(Some(batch)) => {
                    if let Err(err) = effect_handler.send(batch).await {
                        warn!(error = %err, "postgresql receiver failed to forward batch");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "postgresql scrape failed");
                }
            }
        }
        Ok(TerminalState::Stopped)
    }
}

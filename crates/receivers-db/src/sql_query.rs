// SPDX-License-Identifier: Apache-2.0

//! Generic SQL query receiver (§4.2): runs a user-supplied read-only
//! statement on a schedule and turns each result row into either a metric
//! data point or a log record. An optional `tracking_column` makes emission
//! incremental across restarts via the checkpoint [`Storage`].

use crate::error::Error;
use crate::readonly::is_read_only;
use crate::row::{from_mysql_row, from_postgres_row, CellValue, QueryRow};
use crate::scheduler::{TickOutcome, TickScheduler};
use async_trait::async_trait;
use dbscope_engine::{ControlChannel, EffectHandler, ReceiverErrorKind, TerminalState};
use dbscope_pdata::{
    now, AnyBatch, Attributes, LogBody, LogRecord, LogsBatch, Metric, MetricKind, MetricsBatch,
    NumberDataPoint, NumberValue, Resource, ResourceSet, Scope, Severity,
};
use dbscope_storage::{CheckpointExt, Storage};
use dbscope_telemetry::{info, warn, MetricsRegistryHandle};
use serde::{de::Error as _, Deserialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::NoTls;

const SCOPE_NAME: &str = "dbscope/sqlqueryreceiver";
const SCOPE_VERSION: &str = "0.1.0";

/// Which backend `connection_string` addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// PostgreSQL.
    Postgres,
    /// MySQL.
    Mysql,
}

/// What a result row is converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// One `NumberDataPoint` per row, taken from `value_column`.
    Metric,
    /// One `LogRecord` per row.
    Log,
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the `sql_query` receiver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlQueryConfig {
    /// Which backend to connect with.
    pub driver: Driver,
    /// Connection string/URL for that backend.
    pub connection_string: String,
    /// The statement to run. Must be a `SELECT` or `WITH` (§4.2, §6).
    pub query: String,
    /// How often to run it.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub collection_interval: Duration,
    /// Output shape.
    pub output: OutputKind,
    /// Required when `output: metric` — the emitted metric's name.
    #[serde(default)]
    pub metric_name: Option<String>,
    /// Required when `output: metric` — the column holding the numeric value.
    #[serde(default)]
    pub value_column: Option<String>,
    /// When set, only rows with a larger value in this column than last
    /// observed are emitted, and the maximum seen is checkpointed (§4.2).
    #[serde(default)]
    pub tracking_column: Option<String>,
}

impl SqlQueryConfig {
    fn validate(&self) -> Result<(), Error> {
        if !is_read_only(&self.query) {
            return Err(Error::Config(serde_yaml::Error::custom(
                "sql_query receiver only accepts SELECT or WITH statements",
            )));
        }
        if self.output == OutputKind::Metric && (self.metric_name.is_none() || self.value_column.is_none()) {
            return Err(Error::Config(serde_yaml::Error::custom(
                "output: metric requires metric_name and value_column",
            )));
        }
        Ok(())
    }
}

enum Connection {
    Postgres(tokio_postgres::Client),
    Mysql(mysql_async::Conn),
}

impl Connection {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<QueryRow>, Error> {
        match self {
            Connection::Postgres(client) => {
                let rows = client.query(sql, &[]).await?;
                Ok(rows.iter().map(from_postgres_row).collect())
            }
            Connection::Mysql(conn) => {
                use mysql_async::prelude::Queryable;
                let rows: Vec<mysql_async::Row> = conn.query(sql).await?;
                Ok(rows.iter().map(from_mysql_row).collect())
            }
        }
    }
}

/// The `sql_query` receiver.
pub struct SqlQueryReceiver {
    config: SqlQueryConfig,
    storage: Arc<dyn Storage>,
    metrics: MetricsRegistryHandle,
}

impl SqlQueryReceiver {
    /// Builds a receiver from its raw settings value.
    pub fn from_settings(
        settings: &serde_yaml::Value,
        storage: Arc<dyn Storage>,
        metrics: MetricsRegistryHandle,
    ) -> Result<Self, Error> {
        let config: SqlQueryConfig = serde_yaml::from_value(settings.clone())?;
        config.validate()?;
        Ok(Self { config, storage, metrics })
    }

    async fn scrape(&self, conn: &mut Connection, checkpoint_key: &str) -> Result<Option<AnyBatch>, Error> {
        let rows = conn.query_rows(&self.config.query).await?;
        let last_seen = match &self.config.tracking_column {
            Some(_) => self.storage.get_checkpoint(checkpoint_key).await,
            None => None,
        };
        let mut max_value = last_seen;
        let mut emitted = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(col) = &self.config.tracking_column {
                let Some(value) = row.get(col).and_then(CellValue::as_u64) else {
                    continue;
                };
                if let Some(last) = last_seen {
                    if value <= last {
                        continue;
                    }
                }
                max_value = Some(max_value.map_or(value, |m| m.max(value)));
            }
            emitted.push(row);
        }
        if let Some(max) = max_value {
            if max_value != last_seen {
                self.storage.set_checkpoint(checkpoint_key, max).await?;
            }
        }
        if emitted.is_empty() {
            return Ok(None);
        }
        Ok(Some(match self.config.output {
            OutputKind::Metric => AnyBatch::Metrics(self.rows_to_metrics(&emitted)),
            OutputKind::Log => AnyBatch::Logs(self.rows_to_logs(&emitted)),
        }))
    }

    fn rows_to_metrics(&self, rows: &[QueryRow]) -> MetricsBatch {
        let time = now();
        let metric_name = self.config.metric_name.as_deref().unwrap_or("db.sql_query.value");
        let value_column = self.config.value_column.as_deref().unwrap_or("value");
        let mut scope: Scope<Metric> = Scope::new(SCOPE_NAME, SCOPE_VERSION);
        for row in rows {
            let Some(value) = row.get(value_column).and_then(CellValue::as_f64) else {
                continue;
            };
            let mut attributes = Attributes::new();
            for (col, val) in row.columns.iter().zip(row.values.iter()) {
                if col != value_column {
                    attributes.insert(col.clone(), val);
                }
            }
            scope = scope.with_item(Metric {
                name: metric_name.to_string(),
                unit: "1".to_string(),
                description: String::new(),
                kind: MetricKind::Gauge(vec![NumberDataPoint {
                    start_time: None,
                    time,
                    attributes,
                    value: NumberValue::Double(value),
                }]),
            });
        }
        let mut resource_set = ResourceSet::new(Resource::new(Attributes::new().with("dbscope.receiver", "sql_query")));
        resource_set
            .push_scope(scope)
            .expect("single scope, no duplicate identity possible");
        MetricsBatch {
            resource_sets: vec![resource_set],
        }
    }

    fn rows_to_logs(&self, rows: &[QueryRow]) -> LogsBatch {
        let time = now();
        let mut scope: Scope<LogRecord> = Scope::new(SCOPE_NAME, SCOPE_VERSION);
        for row in rows {
            let mut attributes = Attributes::new();
            let mut parts = Vec::with_capacity(row.columns.len());
            for (col, val) in row.columns.iter().zip(row.values.iter()) {
                parts.push(format!("{col}={}", val.to_display_string()));
                attributes.insert(col.clone(), val);
            }
            scope = scope.with_item(LogRecord {
                time,
                severity: Severity::INFO,
                body: LogBody::String(parts.join(" ")),
                attributes,
                trace_id: None,
                span_id: None,
            });
        }
        let mut resource_set = ResourceSet::new(Resource::new(Attributes::new().with("dbscope.receiver", "sql_query")));
        resource_set
            .push_scope(scope)
            .expect("single scope, no duplicate identity possible");
        LogsBatch {
            resource_sets: vec![resource_set],
        }
    }

    async fn connect(&self, node: &dbscope_engine::NodeId) -> Result<Connection, dbscope_engine::Error> {
        match self.config.driver {
            Driver::Postgres => {
                let (client, connection) = tokio_postgres::connect(&self.config.connection_string, NoTls)
                    .await
                    .map_err(|e| Error::Postgres(e).into_engine_error(node.clone(), ReceiverErrorKind::Connect))?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        warn!(error = %err, "sql_query postgresql connection task ended");
                    }
                });
                Ok(Connection::Postgres(client))
            }
            Driver::Mysql => {
                let opts = mysql_async::Opts::from_url(&self.config.connection_string).map_err(|e| {
                    dbscope_engine::Error::Receiver {
                        receiver: node.clone(),
                        kind: ReceiverErrorKind::Configuration,
                        message: format!("invalid mysql connection string: {e}"),
                    }
                })?;
                let conn = mysql_async::Conn::new(opts)
                    .await
                    .map_err(|e| Error::MySql(e).into_engine_error(node.clone(), ReceiverErrorKind::Connect))?;
                Ok(Connection::Mysql(conn))
            }
        }
    }
}

#[async_trait]
impl dbscope_engine::Receiver for SqlQueryReceiver {
    async fn start(
        &mut self,
        mut ctrl: ControlChannel,
        effect_handler: EffectHandler,
    ) -> Result<TerminalState, dbscope_engine::Error> {
        let node = effect_handler.node_id().clone();
        let mut conn = self.connect(&node).await?;
        info!(receiver = %node, "sql_query receiver connected");
        let checkpoint_key = format!("sql_query/{node}");

        let mut scheduler = TickScheduler::new("sql_query", self.config.collection_interval, &self.metrics);
        loop {
            match scheduler.wait(&mut ctrl).await {
                TickOutcome::Shutdown => break,
                TickOutcome::Scrape => {}
            }
            match self.scrape(&mut conn, &checkpoint_key).await {
                Ok(Some(batch)) => {
                    if let Err(err) = effect_handler.send(batch).await {
                        warn!(error = %err, "sql_query receiver failed to forward batch");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "sql_query scrape failed"),
            }
        }
        Ok(TerminalState::Stopped)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Database telemetry receivers: PostgreSQL, MySQL, a generic read-only SQL
//! query receiver, and an Active Session History sampler (§4.1).

mod ash;
mod delta_cache;
mod error;
mod mysql;
mod obfuscator;
mod postgres;
mod readonly;
mod row;
mod scheduler;
mod sql_query;

pub use ash::{AshConfig, AshReceiver};
pub use error::Error;
pub use mysql::{MysqlConfig, MysqlReceiver};
pub use obfuscator::{obfuscate, ObfuscatedQuery};
pub use postgres::{PostgresConfig, PostgresReceiver, ReceiverSignal};
pub use readonly::is_read_only;
pub use sql_query::{Driver, OutputKind, SqlQueryConfig, SqlQueryReceiver};

use dbscope_engine::Registry;
use dbscope_storage::Storage;
use dbscope_telemetry::MetricsRegistryHandle;
use std::sync::Arc;

/// Registers every receiver factory in this crate under its `type` name
/// (§6: `postgresql`, `mysql`, `sql_query`, `ash`).
pub fn register(registry: &mut Registry, metrics: MetricsRegistryHandle, storage: Arc<dyn Storage>) {
    let m = metrics.clone();
    registry.register_receiver(
        "postgresql",
        Box::new(move |settings| {
            PostgresReceiver::from_settings(settings, m.clone())
                .map(|r| Box::new(r) as Box<dyn dbscope_engine::Receiver>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_receiver(
        "mysql",
        Box::new(move |settings| {
            MysqlReceiver::from_settings(settings, m.clone())
                .map(|r| Box::new(r) as Box<dyn dbscope_engine::Receiver>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_receiver(
        "ash",
        Box::new(move |settings| {
            AshReceiver::from_settings(settings, m.clone())
                .map(|r| Box::new(r) as Box<dyn dbscope_engine::Receiver>)
                .map_err(Into::into)
        }),
    );

    let m = metrics;
    let s = storage;
    registry.register_receiver(
        "sql_query",
        Box::new(move |settings| {
            SqlQueryReceiver::from_settings(settings, s.clone(), m.clone())
                .map(|r| Box::new(r) as Box<dyn dbscope_engine::Receiver>)
                .map_err(Into::into)
        }),
    );
}

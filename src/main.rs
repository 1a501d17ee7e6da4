// SPDX-License-Identifier: Apache-2.0

//! Service binary entry point (§6): CLI parsing, config loading, component
//! registration, and the startup/shutdown sequence around
//! [`dbscope_engine::Service`].

use clap::Parser;
use dbscope_config::{ComponentGraph, ComponentId, ComponentKind, ConfigError, RawConfig};
use dbscope_engine::{Error as EngineError, Registry, Service};
use dbscope_storage::FileStorage;
use dbscope_telemetry::{HealthRegistryHandle, MetricsRegistryHandle};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Invalid command-line usage (`sysexits.h` `EX_USAGE`).
const EXIT_USAGE: u8 = 64;
/// The configuration failed to load, validate, or (under `--dry-run`)
/// build a component from its settings.
const EXIT_CONFIG_ERROR: u8 = 1;
/// Configuration was valid but the service failed to start.
const EXIT_STARTUP_FAILURE: u8 = 2;

/// Samples PostgreSQL/MySQL telemetry, shapes it through a processor chain,
/// and exports it over OTLP/HTTP.
#[derive(Parser, Debug)]
#[command(name = "dbscope", version, about)]
struct Cli {
    /// Configuration source, repeatable; later sources override earlier
    /// ones (`file:path`, or a bare path).
    #[arg(long = "config", value_name = "URI")]
    config: Vec<String>,

    /// Override a configuration value: `key.path=value`, repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Validate configuration, the component graph, and every component's
    /// settings, then exit without starting any pipeline.
    #[arg(long)]
    dry_run: bool,

    /// Path to the checkpoint file used by incremental receivers (§6).
    #[arg(long, value_name = "PATH", default_value = "dbscope-checkpoints.json")]
    storage_path: String,
}

fn parse_overrides(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("invalid --set value `{entry}`, expected key=value"))
        })
        .collect()
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let overrides = match parse_overrides(&cli.set) {
        Ok(overrides) => overrides,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let (raw, graph) = match dbscope_config::load(&cli.config, &overrides) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let log_level = raw
        .service
        .as_ref()
        .map(|s| s.telemetry.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    dbscope_telemetry::init_tracing(&log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    if cli.dry_run {
        // §6: "--dry-run (validate only, exit 0/1)" — a dry run never
        // starts anything, so every failure here is a config error, not a
        // startup failure.
        return match runtime.block_on(validate(&raw, &graph, &cli.storage_path)) {
            Ok(()) => {
                info!(pipelines = graph.pipelines.len(), "configuration and component settings are valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::from(EXIT_CONFIG_ERROR)
            }
        };
    }

    match runtime.block_on(run(raw, graph, cli.storage_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            let code = match e {
                EngineError::Config(_) => EXIT_CONFIG_ERROR,
                _ => EXIT_STARTUP_FAILURE,
            };
            ExitCode::from(code)
        }
    }
}

/// Builds the component registry shared by `validate` and `run`: every
/// receiver/processor/exporter crate registers its factories, backed by the
/// same checkpoint storage and metrics registry a real run would use.
async fn build_registry(storage_path: &str) -> Result<(Registry, MetricsRegistryHandle, HealthRegistryHandle), EngineError> {
    let metrics = dbscope_telemetry::MetricsRegistry::new();
    let health = HealthRegistryHandle::new();

    let storage = FileStorage::open(storage_path)
        .await
        .map_err(|e| EngineError::Config(ConfigError::SourceReadError {
            uri: "checkpoint storage".to_string(),
            details: e.to_string(),
        }))?;
    let storage: Arc<dyn dbscope_storage::Storage> = Arc::new(storage);

    let mut registry = Registry::new();
    dbscope_receivers_db::register(&mut registry, metrics.clone(), storage);
    dbscope_processors_db::register(&mut registry, metrics.clone());
    dbscope_exporter_otlp::register(&mut registry, metrics.clone());

    Ok((registry, metrics, health))
}

fn settings_for<'a>(raw: &'a RawConfig, id: &ComponentId) -> &'a serde_yaml::Value {
    let map = match id.kind {
        ComponentKind::Receiver => &raw.receivers,
        ComponentKind::Processor => &raw.processors,
        ComponentKind::Exporter => &raw.exporters,
        ComponentKind::Extension => &raw.extensions,
    };
    static NULL: serde_yaml::Value = serde_yaml::Value::Null;
    map.get(&id.key()).unwrap_or(&NULL)
}

/// Builds (and immediately drops) every component referenced by `graph`, so
/// that settings errors — e.g. the `sql_query` receiver's read-only
/// pre-check rejecting a non-`SELECT` statement — surface under
/// `--dry-run` exactly as they would at real startup.
async fn validate(raw: &RawConfig, graph: &ComponentGraph, storage_path: &str) -> Result<(), EngineError> {
    let (registry, _metrics, _health) = build_registry(storage_path).await?;
    for pipeline in graph.pipelines.values() {
        for id in &pipeline.receivers {
            let _ = registry.build_receiver(&id.type_name, settings_for(raw, id))?;
        }
        for id in &pipeline.processors {
            let _ = registry.build_processor(&id.type_name, settings_for(raw, id))?;
        }
        for id in &pipeline.exporters {
            let _ = registry.build_exporter(&id.type_name, settings_for(raw, id))?;
        }
    }
    Ok(())
}

async fn run(raw: RawConfig, graph: ComponentGraph, storage_path: String) -> Result<(), EngineError> {
    let (registry, metrics, health) = build_registry(&storage_path).await?;

    let service = Service::start(&raw, &graph, &registry)?;
    let admin_bind = raw
        .service
        .as_ref()
        .map(|s| s.telemetry.admin_bind_address.clone())
        .unwrap_or_else(|| "127.0.0.1:8888".to_string());
    let cancel = service.cancellation_token();

    let (_, admin_result) = tokio::join!(
        service.run_until(shutdown_signal()),
        dbscope_admin::run(&admin_bind, health, metrics, cancel)
    );
    if let Err(e) = admin_result {
        error!(error = %e, "admin HTTP server exited with an error");
    }

    Ok(())
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        let _ = sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

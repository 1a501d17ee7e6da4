// SPDX-License-Identifier: Apache-2.0

//! HTTP server for the admin endpoints: `/health` and `/metrics` (§6).

pub mod error;
mod health;
mod metrics;

use axum::Router;
use dbscope_telemetry::{HealthRegistryHandle, MetricsRegistryHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use crate::error::Error;

/// Shared state for the admin HTTP server.
#[derive(Clone)]
pub(crate) struct AppState {
    health: HealthRegistryHandle,
    metrics: MetricsRegistryHandle,
}

/// Runs the admin HTTP server until `cancel` is triggered, e.g. alongside
/// [`dbscope_engine::Service::cancellation_token`].
pub async fn run(
    bind_address: &str,
    health: HealthRegistryHandle,
    metrics: MetricsRegistryHandle,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let state = AppState { health, metrics };

    let app = Router::new()
        .merge(health::routes())
        .merge(metrics::routes())
        .layer(ServiceBuilder::new())
        .with_state(state);

    let addr = bind_address.parse::<SocketAddr>().map_err(|e| Error::InvalidBindAddress {
        bind_address: bind_address.to_string(),
        details: e.to_string(),
    })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| Error::BindFailed {
        addr: addr.to_string(),
        details: e.to_string(),
    })?;

    info!(endpoint = %addr, "admin HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|e| Error::ServerError {
            addr: addr.to_string(),
            details: e.to_string(),
        })
}

// SPDX-License-Identifier: Apache-2.0

//! `GET /metrics` (§6): Prometheus text exposition format of self metrics.

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// The `/metrics` route.
pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(show_metrics))
}

pub(crate) async fn show_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.encode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_telemetry::{HealthRegistryHandle, MetricsRegistry};

    #[tokio::test]
    async fn metrics_endpoint_includes_registered_series() {
        let metrics = MetricsRegistry::new();
        let g = metrics.gauge_vec("dbscope_test_queue_size", "test", &["exporter"]).unwrap();
        g.with_label_values(&["otlp"]).set(3.0);
        let state = AppState { health: HealthRegistryHandle::new(), metrics };

        let body = show_metrics(State(state)).await.unwrap();
        assert!(body.contains("dbscope_test_queue_size"));
    }
}

// SPDX-License-Identifier: Apache-2.0

//! `GET /health` (§6): 200 with a JSON body summarizing component statuses,
//! 503 if any component has reported `Failed` and not since recovered.

use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use dbscope_telemetry::ComponentStatus;
use serde::Serialize;
use std::collections::HashMap;

/// The `/health` route.
pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/health", get(show_health))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    generated_at: String,
    components: HashMap<String, ComponentStatus>,
}

pub(crate) async fn show_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let components = state.health.snapshot();
    let healthy = state.health.is_healthy();
    let body = HealthResponse {
        status: if healthy { "ok" } else { "failed" },
        generated_at: Utc::now().to_rfc3339(),
        components,
    };
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_telemetry::HealthRegistryHandle;

    #[tokio::test]
    async fn reports_503_once_a_component_fails() {
        let health = HealthRegistryHandle::new();
        let metrics = dbscope_telemetry::MetricsRegistry::new();
        let state = AppState { health: health.clone(), metrics };

        let (code, Json(body)) = show_health(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "ok");

        health.set_status("postgresql/primary", ComponentStatus::Failed);
        let (code, Json(body)) = show_health(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "failed");
    }
}

//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    pub service: String,

    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentHealth>,
}

/// What the control plane is currently holding.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    /// Connected agents.
    pub agents: usize,

    /// Jobs created and not yet finished.
    pub active_jobs: usize,

    pub resources: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Liveness: the process is up.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness: reports agent and job counts. Degraded while shutting down.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (active_jobs, resources) = state
        .with_domain(|domain| (domain.jobs.active_len(), domain.resources.len()))
        .await;
    let components = ComponentHealth {
        agents: state.agents().count(),
        active_jobs,
        resources,
    };

    if *state.shutdown_signal().borrow() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response("degraded", Some(components))),
        )
    } else {
        (StatusCode::OK, Json(response("ok", Some(components))))
    }
}

fn response(status: &str, components: Option<ComponentHealth>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "control-plane".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components,
    }
}

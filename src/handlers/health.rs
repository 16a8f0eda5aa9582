//! Health and Infrastructure Handlers
//!
//! Kubernetes probes, metrics, and the service descriptor.

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use super::router::AppState;
use crate::constants::TASK_COMPLETED_ROUTE;
use crate::metrics;

/// Health response for main health endpoint
#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Main health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.role().as_str().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe - process is up and serving
pub async fn health_live() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "alive",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Readiness probe - 503 while the sidecar is unreachable
pub async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let sidecar_ready = match state.sidecar() {
        Some(client) => client.healthy().await,
        None => true,
    };

    let (status, label) = if sidecar_ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    let sidecar = match (state.sidecar(), sidecar_ready) {
        (None, _) => "disabled",
        (Some(_), true) => "up",
        (Some(_), false) => "down",
    };

    (
        status,
        Json(json!({
            "status": label,
            "service": state.role().as_str(),
            "version": env!("CARGO_PKG_VERSION"),
            "sidecar": sidecar,
            "uptime_seconds": (chrono::Utc::now() - state.started_at()).num_seconds(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Service descriptor: endpoints and subscriptions for this role
pub async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    let role = state.role();

    let mut endpoints = serde_json::Map::new();
    endpoints.insert("health".into(), json!("/health"));
    endpoints.insert("metrics".into(), json!("/metrics"));
    if role.serves_tasks() {
        endpoints.insert("tasks".into(), json!("/api/tasks"));
    }
    if role.consumes_events() {
        endpoints.insert("subscribe".into(), json!("/dapr/subscribe"));
        endpoints.insert("task_completed".into(), json!(TASK_COMPLETED_ROUTE));
    }
    if role.runs_notifications() {
        endpoints.insert(
            "reminder_check".into(),
            json!("/api/notifications/reminder-check"),
        );
        endpoints.insert(
            "notification_stream".into(),
            json!("/api/notifications/stream"),
        );
    }

    let subscriptions: Vec<&str> = if role.consumes_events() {
        vec![state.config().sidecar.topic.as_str()]
    } else {
        Vec::new()
    };

    Json(json!({
        "service": format!("taskflow {}", role.as_str()),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": endpoints,
        "subscriptions": subscriptions
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> Result<String, StatusCode> {
    metrics::gather_text().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

//! Router Configuration - Centralized route definitions
//!
//! Routes are split into public (no auth) and protected (API key) and mounted
//! according to the service role: the task API only where the task store
//! lives, delivery and reminder routes only where the consumers run.

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use super::state::ServiceState;
use super::{health, pubsub, reminders, tasks};
use crate::auth::auth_middleware;
use crate::constants::TASK_COMPLETED_ROUTE;

/// Application state type alias
pub type AppState = Arc<ServiceState>;

/// Build the public routes (no authentication required)
///
/// These routes must always be accessible for:
/// - Health checks (Kubernetes probes)
/// - Metrics (Prometheus scraping)
/// - Bus subscription discovery and deliveries (called by the sidecar)
/// - The reminder trigger (called by the scheduler binding)
pub fn build_public_routes(state: AppState) -> Router {
    let role = state.role();

    // =================================================================
    // HEALTH & KUBERNETES PROBES
    // =================================================================
    let mut router = Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/health/live", get(health::health_live))
        .route("/health/ready", get(health::health_ready))
        // =================================================================
        // METRICS (PROMETHEUS)
        // =================================================================
        .route("/metrics", get(health::metrics_endpoint))
        // =================================================================
        // PUB/SUB DISCOVERY
        // =================================================================
        .route("/dapr/subscribe", get(pubsub::subscribe));

    // =================================================================
    // EVENT DELIVERY
    // =================================================================
    if role.consumes_events() {
        router = router.route(TASK_COMPLETED_ROUTE, post(pubsub::task_completed));
    }

    // =================================================================
    // REMINDER TRIGGER
    // =================================================================
    if role.runs_notifications() {
        router = router.route(
            "/api/notifications/reminder-check",
            post(reminders::reminder_check),
        );
    }

    router.with_state(state)
}

/// Build the protected API routes (API key required)
///
/// The auth middleware is applied here as a route layer, so unmatched paths
/// still 404 instead of 401.
pub fn build_protected_routes(state: AppState) -> Router {
    let role = state.role();
    let keys = state.api_keys().clone();

    let mut router = Router::new();
    let mut mounted = false;

    // =================================================================
    // TASKS
    // =================================================================
    if role.serves_tasks() {
        router = router
            .route(
                "/api/tasks",
                get(tasks::list_tasks).post(tasks::create_task),
            )
            .route(
                "/api/tasks/{task_id}",
                get(tasks::get_task)
                    .put(tasks::update_task)
                    .delete(tasks::delete_task),
            )
            .route("/api/tasks/{task_id}/complete", patch(tasks::complete_task))
            // =============================================================
            // INTERNAL (SERVICE INVOCATION FROM CONSUMERS)
            // =============================================================
            .route("/internal/tasks", post(tasks::insert_internal))
            .route("/internal/tasks/due", get(tasks::due_internal));
        mounted = true;
    }

    // =================================================================
    // NOTIFICATION STREAM (SSE)
    // =================================================================
    if role.runs_notifications() {
        router = router.route(
            "/api/notifications/stream",
            get(reminders::notification_stream),
        );
        mounted = true;
    }

    // route_layer panics on a router without routes
    if !mounted {
        return Router::new();
    }

    router
        .route_layer(middleware::from_fn_with_state(keys, auth_middleware))
        .with_state(state)
}

/// Build the complete router with both public and protected routes
///
/// Concurrency limits, CORS and request metrics are applied by the caller.
pub fn build_router(state: AppState) -> Router {
    let public = build_public_routes(state.clone());
    let protected = build_protected_routes(state);

    Router::new().merge(public).merge(protected)
}

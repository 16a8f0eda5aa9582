//! Reminder trigger and notification stream

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use super::router::AppState;
use super::state::ServiceState;
use crate::errors::AppError;
use crate::validation;

/// Query parameters for the notification stream
#[derive(Debug, serde::Deserialize)]
pub struct StreamQuery {
    pub user_id: Option<String>,
}

/// Hourly trigger from the external scheduler; the body is ignored
pub async fn reminder_check(State(state): State<AppState>, _trigger: Bytes) -> Response {
    tracing::info!("Reminder check triggered");
    run_sweep(&state).await
}

/// Run one sweep and render the summary
pub async fn run_sweep(state: &ServiceState) -> Response {
    let Some(engine) = state.notifications() else {
        return AppError::ServiceUnavailable("notification service not enabled".to_string())
            .into_response();
    };

    match engine.reminder_sweep(chrono::Utc::now()).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            tracing::error!("Reminder sweep failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "message": format!("{e:#}")
                })),
            )
                .into_response()
        }
    }
}

/// SSE stream of one user's notifications
///
/// Requires `?user_id=`; without it the stream is rejected.
pub async fn notification_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamQuery>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let user_id = params.user_id.ok_or_else(|| AppError::InvalidInput {
        field: "user_id".to_string(),
        reason: "required".to_string(),
    })?;
    validation::validate_user_id(&user_id).map_err(|e| AppError::InvalidUserId(e.to_string()))?;

    let stream = BroadcastStream::new(state.notifier().subscribe());

    let event_stream = stream.filter_map(move |result| {
        let user_id = user_id.clone();
        async move {
            match result {
                Ok(notification) if notification.user_id == user_id => {
                    let json = serde_json::to_string(&notification).ok()?;
                    Some(Ok(Event::default()
                        .event(notification.kind.as_str())
                        .data(json)))
                }
                _ => None,
            }
        }
    });

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

/// In-process replacement for the external scheduler
///
/// The first tick fires after one full period.
pub async fn run_sweep_loop(state: AppState, period: std::time::Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(period_secs = period.as_secs(), "Reminder sweep loop started");
    loop {
        interval.tick().await;
        let Some(engine) = state.notifications() else {
            return;
        };
        match engine.reminder_sweep(chrono::Utc::now()).await {
            Ok(summary) => tracing::debug!(sent = summary.notifications_sent, "Scheduled reminder sweep done"),
            Err(e) => tracing::error!("Scheduled reminder sweep failed: {:#}", e),
        }
    }
}

//! Pub/sub delivery handlers
//!
//! The bus discovers subscriptions through `GET /dapr/subscribe` and POSTs each
//! `task.completed` delivery to [`TASK_COMPLETED_ROUTE`]. The answer uses the
//! bus acknowledgement vocabulary:
//!
//! - `SUCCESS`: handled (including ignored and duplicate deliveries)
//! - `RETRY`: a consumer failed before committing its side effect; sent with
//!   HTTP 500 so the bus redelivers
//! - `DROP`: the payload can never be handled

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::broadcast;

use super::router::AppState;
use super::state::ServiceState;
use crate::constants::TASK_COMPLETED_ROUTE;
use crate::events::TaskCompletedEvent;
use crate::metrics::EVENTS_RECEIVED_TOTAL;
use crate::notifications::CompletionOutcome;
use crate::recurrence::RecurrenceOutcome;
use crate::sidecar::BusMessage;

/// Redelivery attempts made by the in-process dispatcher
const LOCAL_MAX_ATTEMPTS: u32 = 3;
const LOCAL_RETRY_BASE: Duration = Duration::from_millis(100);

/// Programmatic subscription entry
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub pubsubname: String,
    pub topic: String,
    pub route: String,
}

/// Acknowledgement returned to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Ack {
    Success,
    Retry,
    Drop,
}

impl Ack {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Ack::Retry => StatusCode::INTERNAL_SERVER_ERROR,
            Ack::Success | Ack::Drop => StatusCode::OK,
        }
    }
}

/// Result of dispatching one delivery to the enabled consumers
#[derive(Debug, Clone)]
pub struct Delivery {
    pub ack: Ack,
    pub body: Value,
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        (self.ack.status_code(), Json(self.body)).into_response()
    }
}

/// Subscriptions for the consumers this role runs
pub async fn subscribe(State(state): State<AppState>) -> Json<Vec<Subscription>> {
    Json(subscriptions(&state))
}

pub fn subscriptions(state: &ServiceState) -> Vec<Subscription> {
    if !state.role().consumes_events() {
        return Vec::new();
    }
    let sidecar = &state.config().sidecar;
    vec![Subscription {
        pubsubname: sidecar.pubsub_name.clone(),
        topic: sidecar.topic.clone(),
        route: TASK_COMPLETED_ROUTE.to_string(),
    }]
}

/// `task.completed` delivery from the bus
pub async fn task_completed(State(state): State<AppState>, body: Bytes) -> Delivery {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Dropping undecodable delivery: {}", e);
            EVENTS_RECEIVED_TOTAL.with_label_values(&["boundary", "dropped"]).inc();
            return Delivery {
                ack: Ack::Drop,
                body: json!({"status": Ack::Drop, "reason": e.to_string()}),
            };
        }
    };

    dispatch(&state, payload, Utc::now()).await
}

/// Normalize one payload and hand it to every enabled consumer
///
/// Consumers run concurrently and independently. Any retryable failure turns
/// the whole delivery into `RETRY`; the consumer that already succeeded sees
/// a duplicate on redelivery.
pub async fn dispatch(state: &ServiceState, payload: Value, now: DateTime<Utc>) -> Delivery {
    let event = match TaskCompletedEvent::from_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Dropping malformed task.completed event: {}", e);
            EVENTS_RECEIVED_TOTAL.with_label_values(&["boundary", "dropped"]).inc();
            return Delivery {
                ack: Ack::Drop,
                body: json!({"status": Ack::Drop, "reason": e.to_string()}),
            };
        }
    };

    tracing::info!(
        task_id = %event.id,
        user_id = %event.user_id,
        is_recurring = event.is_recurring,
        pattern = %event.recurrence_pattern,
        "Received task.completed"
    );

    let recurrence = async {
        match state.recurrence() {
            Some(engine) => Some(engine.handle(&event, now).await),
            None => None,
        }
    };
    let notification = async {
        match state.notifications() {
            Some(engine) => Some(engine.on_task_completed(&event, now).await),
            None => None,
        }
    };
    let (recurrence, notification) = tokio::join!(recurrence, notification);

    let mut ack = Ack::Success;
    let mut body = Map::new();

    match recurrence {
        Some(Ok(outcome)) => {
            body.insert("recurrence".into(), json!(outcome.as_str()));
            if let RecurrenceOutcome::Created { task_id, next_due } = outcome {
                body.insert("next_task_id".into(), json!(task_id.to_string()));
                body.insert("next_due".into(), json!(next_due.to_rfc3339()));
            }
        }
        Some(Err(e)) => {
            tracing::error!(task_id = %event.id, "Recurrence consumer failed: {:#}", e);
            body.insert("recurrence".into(), json!("error"));
            ack = Ack::Retry;
        }
        None => {}
    }

    match notification {
        Some(Ok(outcome)) => {
            body.insert("notification".into(), json!(outcome.as_str()));
            if let CompletionOutcome::Sent(n) = outcome {
                body.insert("message".into(), json!(n.message));
            }
        }
        Some(Err(e)) => {
            tracing::error!(task_id = %event.id, "Notification consumer failed: {:#}", e);
            body.insert("notification".into(), json!("error"));
            ack = Ack::Retry;
        }
        None => {}
    }

    body.insert("status".into(), json!(ack));
    Delivery {
        ack,
        body: Value::Object(body),
    }
}

/// Feed the in-process bus to the consumers (local mode)
///
/// Each message is handled on its own task, so deliveries stay concurrent and
/// unordered. `RETRY` is redelivered with exponential backoff.
pub async fn run_local_dispatcher(state: AppState, mut receiver: broadcast::Receiver<BusMessage>) {
    let topic = state.config().sidecar.topic.clone();
    tracing::info!(topic = %topic, "Local event dispatcher started");

    loop {
        match receiver.recv().await {
            Ok(message) => {
                if message.topic != topic {
                    continue;
                }
                let state = state.clone();
                tokio::spawn(async move {
                    deliver_with_retry(&state, message.payload).await;
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Local dispatcher lagged, events lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    tracing::info!("Local event dispatcher stopped");
}

async fn deliver_with_retry(state: &ServiceState, payload: Value) {
    for attempt in 1..=LOCAL_MAX_ATTEMPTS {
        let delivery = dispatch(state, payload.clone(), Utc::now()).await;
        if delivery.ack != Ack::Retry {
            return;
        }
        if attempt < LOCAL_MAX_ATTEMPTS {
            tokio::time::sleep(LOCAL_RETRY_BASE * 2u32.pow(attempt - 1)).await;
        }
    }
    tracing::error!("Local delivery gave up after {} attempts", LOCAL_MAX_ATTEMPTS);
}

//! Completion publisher
//!
//! Called by the task API after a completion is committed. Publishing is best
//! effort: a failure is logged and counted, never surfaced to the caller, and
//! the completion stays committed either way.

use std::sync::Arc;

use super::TaskCompletedEvent;
use crate::metrics::EVENTS_PUBLISHED_TOTAL;
use crate::sidecar::EventPublisher;
use crate::tasks::Task;

pub struct CompletionPublisher {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl CompletionPublisher {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one `task.completed` event for `task`
    ///
    /// Returns whether the bus accepted the event.
    pub async fn task_completed(&self, task: &Task) -> bool {
        let event = TaskCompletedEvent::from_task(task);

        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(task_id = %task.id, "Failed to serialize completion event: {}", e);
                EVENTS_PUBLISHED_TOTAL.with_label_values(&["failed"]).inc();
                return false;
            }
        };

        match self.publisher.publish(&self.topic, &payload).await {
            Ok(()) => {
                EVENTS_PUBLISHED_TOTAL.with_label_values(&["ok"]).inc();
                tracing::info!(
                    task_id = %task.id,
                    user_id = %task.user_id,
                    is_recurring = task.is_recurring,
                    topic = %self.topic,
                    "Published completion event"
                );
                true
            }
            Err(e) => {
                EVENTS_PUBLISHED_TOTAL.with_label_values(&["failed"]).inc();
                tracing::warn!(
                    task_id = %task.id,
                    user_id = %task.user_id,
                    topic = %self.topic,
                    retryable = e.is_retryable(),
                    "Completion event not published (task stays completed): {}",
                    e
                );
                false
            }
        }
    }
}

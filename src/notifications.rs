//! Notification engine
//!
//! Two triggers share one dedup discipline: claim the per-day marker first,
//! then deliver. A marker that is already present means someone else has
//! sent (or is sending) the same notification today.
//!
//! - event path: `task.completed` for a recurring task produces a
//!   `recurring_completion` notification
//! - sweep path: pending tasks due within the reminder window produce
//!   `due_date_reminder` notifications

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::constants::{BROADCAST_CAPACITY, URGENT_PREFIX};
use crate::events::TaskCompletedEvent;
use crate::markers::{Claim, IdempotencyGate, MarkerKey, MarkerKind, NotificationMarker};
use crate::metrics::{DUPLICATES_SKIPPED_TOTAL, EVENTS_RECEIVED_TOTAL, NOTIFICATIONS_SENT_TOTAL};
use crate::tasks::{Task, TaskPriority, TaskRepository};

const CONSUMER: &str = "notification";

/// A message for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: String,
    pub task_id: String,
    pub title: String,
    pub message: String,
    pub kind: MarkerKind,
    pub created_at: DateTime<Utc>,
}

/// Deliver a message to its user
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Logs each notification and fans it out to live stream subscribers
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            task_id = %notification.task_id,
            kind = %notification.kind,
            "Notification: {}",
            notification.message
        );
        // No connected clients is not a failure; the log line is the record.
        let _ = self.sender.send(notification.clone());
        Ok(())
    }
}

/// What the event path did for one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Ignored,
    Sent(Notification),
    Duplicate,
}

impl CompletionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionOutcome::Ignored => "ignored",
            CompletionOutcome::Sent(_) => "sent",
            CompletionOutcome::Duplicate => "duplicate",
        }
    }
}

/// One reminder in a sweep summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderDetail {
    pub task_id: String,
    pub title: String,
    pub user_id: String,
    pub message: String,
}

/// Summary returned by the reminder trigger
#[derive(Debug, Clone, Serialize)]
pub struct ReminderSweep {
    pub status: &'static str,
    pub notifications_sent: usize,
    pub skipped: usize,
    pub details: Vec<ReminderDetail>,
}

pub struct NotificationEngine {
    tasks: Arc<dyn TaskRepository>,
    gate: IdempotencyGate,
    notifier: Arc<dyn Notifier>,
    window: Duration,
}

impl NotificationEngine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        gate: IdempotencyGate,
        notifier: Arc<dyn Notifier>,
        window: Duration,
    ) -> Self {
        Self {
            tasks,
            gate,
            notifier,
            window,
        }
    }

    /// Event path for one `task.completed` delivery
    pub async fn on_task_completed(
        &self,
        event: &TaskCompletedEvent,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let outcome = self.completion(event, now).await;

        let label = match &outcome {
            Ok(o) => o.as_str(),
            Err(_) => "error",
        };
        EVENTS_RECEIVED_TOTAL.with_label_values(&[CONSUMER, label]).inc();

        outcome
    }

    async fn completion(
        &self,
        event: &TaskCompletedEvent,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        if !event.is_recurring {
            return Ok(CompletionOutcome::Ignored);
        }

        let kind = MarkerKind::RecurringCompletion;
        let key = MarkerKey::daily(&event.user_id, &event.id, now.date_naive(), kind);
        let marker = NotificationMarker::new(&event.id, &event.user_id, kind, now);

        match self
            .gate
            .claim(&key, &marker)
            .await
            .with_context(|| format!("Failed to claim notification marker {key}"))?
        {
            Claim::Acquired => {}
            Claim::AlreadyClaimed => {
                DUPLICATES_SKIPPED_TOTAL.with_label_values(&[CONSUMER]).inc();
                tracing::info!(task_id = %event.id, user_id = %event.user_id, "Completion already notified today");
                return Ok(CompletionOutcome::Duplicate);
            }
        }

        let notification = Notification {
            user_id: event.user_id.clone(),
            task_id: event.id.clone(),
            title: event.title.clone(),
            message: completion_message(&event.title),
            kind,
            created_at: now,
        };
        self.emit(&notification).await;

        Ok(CompletionOutcome::Sent(notification))
    }

    /// Timer path: remind about pending tasks due in `(now, now + window]`
    ///
    /// Fails only when the task store cannot be queried. Per-task marker
    /// errors are logged and counted as skipped.
    pub async fn reminder_sweep(&self, now: DateTime<Utc>) -> Result<ReminderSweep> {
        let tasks = self
            .tasks
            .pending_due_between(now, now + self.window)
            .await
            .context("Failed to query tasks due soon")?;

        tracing::info!(count = tasks.len(), window_hours = self.window.num_hours(), "Reminder sweep");

        let kind = MarkerKind::DueDateReminder;
        let mut details = Vec::new();
        let mut skipped = 0;

        for task in tasks {
            let Some(due) = task.due_date else {
                continue;
            };
            let task_id = task.id.to_string();
            let key = MarkerKey::daily(&task.user_id, &task_id, now.date_naive(), kind);
            let marker = NotificationMarker::new(&task_id, &task.user_id, kind, now);

            match self.gate.claim(&key, &marker).await {
                Ok(Claim::Acquired) => {}
                Ok(Claim::AlreadyClaimed) => {
                    DUPLICATES_SKIPPED_TOTAL.with_label_values(&[CONSUMER]).inc();
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, "Reminder marker claim failed, skipping: {}", e);
                    skipped += 1;
                    continue;
                }
            }

            let message = reminder_message(&task, due - now);
            let notification = Notification {
                user_id: task.user_id.clone(),
                task_id: task_id.clone(),
                title: task.title.clone(),
                message: message.clone(),
                kind,
                created_at: now,
            };
            self.emit(&notification).await;

            details.push(ReminderDetail {
                task_id,
                title: task.title,
                user_id: task.user_id,
                message,
            });
        }

        tracing::info!(sent = details.len(), skipped, "Reminder sweep complete");

        Ok(ReminderSweep {
            status: "success",
            notifications_sent: details.len(),
            skipped,
            details,
        })
    }

    async fn emit(&self, notification: &Notification) {
        match self.notifier.deliver(notification).await {
            Ok(()) => {
                NOTIFICATIONS_SENT_TOTAL
                    .with_label_values(&[notification.kind.as_str()])
                    .inc();
            }
            Err(e) => {
                // Marker stays claimed; not retried.
                tracing::error!(
                    user_id = %notification.user_id,
                    task_id = %notification.task_id,
                    "Notification delivery failed: {:#}",
                    e
                );
            }
        }
    }
}

pub fn completion_message(title: &str) -> String {
    format!("Recurring task '{title}' completed. Next instance created.")
}

/// `Reminder: '<title>' is due in <h> hours`, whole hours truncated
pub fn reminder_message(task: &Task, until_due: Duration) -> String {
    let message = format!(
        "Reminder: '{}' is due in {} hours",
        task.title,
        until_due.num_hours()
    );
    if task.priority == TaskPriority::High {
        format!("{URGENT_PREFIX}{message}")
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::MemoryStateStore;
    use crate::tasks::{RecurrencePattern, TaskStore};
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct MuteNotifier;

    #[async_trait]
    impl Notifier for MuteNotifier {
        async fn deliver(&self, _notification: &Notification) -> Result<()> {
            anyhow::bail!("channel closed")
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup(
        notifier: Arc<dyn Notifier>,
    ) -> (TempDir, Arc<TaskStore>, MemoryStateStore, NotificationEngine) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path()).unwrap());
        let state = MemoryStateStore::new();
        let engine = NotificationEngine::new(
            store.clone(),
            IdempotencyGate::new(Arc::new(state.clone())),
            notifier,
            Duration::hours(24),
        );
        (dir, store, state, engine)
    }

    fn recurring_event() -> TaskCompletedEvent {
        TaskCompletedEvent {
            id: "T".into(),
            user_id: "user".into(),
            title: "Water plants".into(),
            is_recurring: true,
            recurrence_pattern: RecurrencePattern::Weekly,
            completed_at: Some(now()),
        }
    }

    #[test]
    fn test_reminder_message_format() {
        let mut task = Task::new("u".into(), "Pay rent".into());
        assert_eq!(
            reminder_message(&task, Duration::minutes(179)),
            "Reminder: 'Pay rent' is due in 2 hours"
        );
        task.priority = TaskPriority::High;
        assert_eq!(
            reminder_message(&task, Duration::hours(5)),
            "URGENT: Reminder: 'Pay rent' is due in 5 hours"
        );
    }

    #[tokio::test]
    async fn test_completion_notified_once_per_day() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();
        let (_dir, _store, state, engine) = setup(Arc::new(notifier));

        let first = engine.on_task_completed(&recurring_event(), now()).await.unwrap();
        let second = engine.on_task_completed(&recurring_event(), now()).await.unwrap();

        assert!(matches!(first, CompletionOutcome::Sent(_)));
        assert_eq!(second, CompletionOutcome::Duplicate);
        assert_eq!(
            state.keys_with_prefix("notification:"),
            vec!["notification:user:T:2024-01-01:recurring_completion".to_string()]
        );

        let delivered = rx.recv().await.unwrap();
        assert_eq!(
            delivered.message,
            "Recurring task 'Water plants' completed. Next instance created."
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_recurring_completion_ignored() {
        let (_dir, _store, state, engine) = setup(Arc::new(BroadcastNotifier::new()));
        let mut event = recurring_event();
        event.is_recurring = false;

        let outcome = engine.on_task_completed(&event, now()).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Ignored);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_marker() {
        let (_dir, _store, state, engine) = setup(Arc::new(MuteNotifier));

        let outcome = engine.on_task_completed(&recurring_event(), now()).await.unwrap();
        assert!(matches!(outcome, CompletionOutcome::Sent(_)));
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_window_and_dedup() {
        let (_dir, store, _state, engine) = setup(Arc::new(BroadcastNotifier::new()));

        let mut soon = Task::new("user".into(), "Soon".into());
        soon.priority = TaskPriority::High;
        soon.due_date = Some(now() + Duration::hours(2));
        store.store_task(&soon).unwrap();

        let mut later = Task::new("user".into(), "Later".into());
        later.due_date = Some(now() + Duration::hours(30));
        store.store_task(&later).unwrap();

        let sweep = engine.reminder_sweep(now()).await.unwrap();
        assert_eq!(sweep.status, "success");
        assert_eq!(sweep.notifications_sent, 1);
        assert_eq!(sweep.details[0].task_id, soon.id.to_string());
        assert_eq!(sweep.details[0].message, "URGENT: Reminder: 'Soon' is due in 2 hours");

        let again = engine.reminder_sweep(now() + Duration::minutes(30)).await.unwrap();
        assert_eq!(again.notifications_sent, 0);
        assert_eq!(again.skipped, 1);
    }
}

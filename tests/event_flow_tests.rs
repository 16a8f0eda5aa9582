//! End-to-end tests for the task.completed pipeline
//!
//! Drives the public dispatch entry point and the engines directly over a
//! RocksDB task store in a temp directory and an in-memory marker store.
//!
//! Run with: `cargo test --test event_flow_tests`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use taskflow::{
    config::{ServerConfig, ServiceRole, SidecarConfig},
    events::TaskCompletedEvent,
    handlers::{dispatch, Ack, Components, ServiceState},
    markers::{IdempotencyGate, MarkerKind},
    notifications::{BroadcastNotifier, CompletionOutcome, NotificationEngine},
    recurrence::{RecurrenceEngine, RecurrenceOutcome},
    sidecar::{LocalBus, MemoryStateStore},
    tasks::{RecurrencePattern, Task, TaskPriority, TaskRepository, TaskStatus, TaskStore},
};

// =============================================================================
// Fixture
// =============================================================================

struct Pipeline {
    state: Arc<ServiceState>,
    store: Arc<TaskStore>,
    markers: MemoryStateStore,
    _dir: TempDir,
}

impl Pipeline {
    fn new() -> Self {
        Self::with_repository(|store| store as Arc<dyn TaskRepository>)
    }

    /// Consumers reach the store through `wrap`
    fn with_repository<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<TaskStore>) -> Arc<dyn TaskRepository>,
    {
        let dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(TaskStore::new(dir.path()).expect("open task store"));
        let markers = MemoryStateStore::new();
        let bus = LocalBus::new();

        let config = ServerConfig {
            storage_path: dir.path().to_path_buf(),
            api_keys: vec!["event-flow-key".to_string()],
            sidecar: SidecarConfig {
                enabled: false,
                ..SidecarConfig::default()
            },
            ..ServerConfig::default()
        };
        let components = Components {
            task_store: Some(store.clone()),
            repository: wrap(store.clone()),
            state_store: Arc::new(markers.clone()),
            publisher: Arc::new(bus.clone()),
            local_bus: Some(bus),
            sidecar: None,
        };

        Self {
            state: Arc::new(ServiceState::assemble(config, ServiceRole::All, components)),
            store,
            markers,
            _dir: dir,
        }
    }

    fn gate(&self) -> IdempotencyGate {
        IdempotencyGate::new(Arc::new(self.markers.clone()))
    }

    fn recurrence(&self) -> RecurrenceEngine {
        RecurrenceEngine::new(self.store.clone(), self.gate())
    }

    fn notifications(&self, notifier: BroadcastNotifier) -> NotificationEngine {
        NotificationEngine::new(
            self.store.clone(),
            self.gate(),
            Arc::new(notifier),
            Duration::hours(24),
        )
    }

    fn tasks_of(&self, user: &str) -> Vec<Task> {
        self.store.list_tasks_for_user(user, None).expect("list tasks")
    }
}

/// Fails the first `failures` inserts, then delegates
struct FlakyRepository {
    inner: Arc<TaskStore>,
    failures: AtomicUsize,
}

impl FlakyRepository {
    fn new(inner: Arc<TaskStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl TaskRepository for FlakyRepository {
    async fn insert_task(&self, task: &Task) -> anyhow::Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("task store unavailable");
        }
        self.inner.insert_task(task).await
    }

    async fn pending_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>> {
        TaskRepository::pending_due_between(&*self.inner, from, to).await
    }
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn recurring_event(task_id: &str, pattern: &str, completed_at: &str) -> serde_json::Value {
    json!({
        "id": task_id,
        "user_id": "user",
        "title": "Water plants",
        "is_recurring": true,
        "recurrence_pattern": pattern,
        "completed_at": completed_at
    })
}

// =============================================================================
// Full delivery
// =============================================================================

#[tokio::test]
async fn weekly_completion_creates_successor_and_notifies_once() {
    let p = Pipeline::new();
    let mut inbox = p.state.notifier().subscribe();
    let now = at(2024, 1, 1, 0, 5);

    let delivery = dispatch(
        &p.state,
        recurring_event("T", "weekly", "2024-01-01T00:00:00Z"),
        now,
    )
    .await;
    assert_eq!(delivery.ack, Ack::Success);
    assert_eq!(delivery.body["recurrence"], "created");
    assert_eq!(delivery.body["notification"], "sent");

    let tasks = p.tasks_of("user");
    assert_eq!(tasks.len(), 1);
    let successor = &tasks[0];
    assert_eq!(successor.title, "Water plants");
    assert_eq!(successor.status, TaskStatus::Pending);
    assert_eq!(successor.due_date, Some(at(2024, 1, 8, 0, 0)));
    assert!(successor.is_recurring);
    assert_eq!(successor.recurrence_pattern, RecurrencePattern::Weekly);
    assert_eq!(
        successor.description.as_deref(),
        Some("Auto-generated task based on weekly pattern.")
    );

    assert_eq!(
        p.markers.keys_with_prefix("notification:"),
        vec!["notification:user:T:2024-01-01:recurring_completion".to_string()]
    );

    let notification = inbox.recv().await.expect("notification delivered");
    assert_eq!(notification.user_id, "user");
    assert_eq!(
        notification.message,
        "Recurring task 'Water plants' completed. Next instance created."
    );
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn redelivery_is_absorbed_by_markers() {
    let p = Pipeline::new();
    let mut inbox = p.state.notifier().subscribe();
    let now = at(2024, 3, 10, 9, 0);
    let payload = recurring_event("T", "daily", "2024-03-10T08:59:00Z");

    for _ in 0..3 {
        let delivery = dispatch(&p.state, payload.clone(), now).await;
        assert_eq!(delivery.ack, Ack::Success);
    }

    assert_eq!(p.tasks_of("user").len(), 1);
    assert_eq!(p.markers.keys_with_prefix("recurrence:").len(), 1);
    assert_eq!(p.markers.keys_with_prefix("notification:").len(), 1);

    assert!(inbox.recv().await.is_ok());
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn failed_insert_is_retried_then_succeeds() {
    let p = Pipeline::with_repository(|store| {
        Arc::new(FlakyRepository::new(store, 1)) as Arc<dyn TaskRepository>
    });
    let now = at(2024, 4, 2, 10, 0);
    let payload = recurring_event("T", "daily", "2024-04-02T09:30:00Z");

    let first = dispatch(&p.state, payload.clone(), now).await;
    assert_eq!(first.ack, Ack::Retry);
    assert_eq!(first.ack.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(first.body["status"], "RETRY");
    assert_eq!(first.body["recurrence"], "error");
    assert_eq!(first.body["notification"], "sent");
    assert!(p.tasks_of("user").is_empty());
    assert!(p.markers.keys_with_prefix("recurrence:").is_empty());

    let second = dispatch(&p.state, payload, now).await;
    assert_eq!(second.ack, Ack::Success);
    assert_eq!(second.body["recurrence"], "created");
    assert_eq!(second.body["notification"], "duplicate");

    let tasks = p.tasks_of("user");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].due_date, Some(at(2024, 4, 3, 9, 30)));
    assert_eq!(p.markers.keys_with_prefix("recurrence:").len(), 1);
    assert_eq!(p.markers.keys_with_prefix("notification:").len(), 1);
}

#[tokio::test]
async fn concurrent_deliveries_produce_one_successor() {
    let p = Pipeline::new();
    let now = at(2024, 5, 1, 12, 0);
    let payload = recurring_event("T", "monthly", "2024-05-01T11:00:00Z");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = p.state.clone();
            let payload = payload.clone();
            tokio::spawn(async move { dispatch(&state, payload, now).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        let delivery = handle.await.expect("dispatch task panicked");
        assert_eq!(delivery.ack, Ack::Success);
        if delivery.body["recurrence"] == "created" {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    let tasks = p.tasks_of("user");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].due_date, Some(at(2024, 5, 31, 11, 0)));
    assert_eq!(p.markers.keys_with_prefix("notification:").len(), 1);
}

#[tokio::test]
async fn non_recurring_completion_is_ignored() {
    let p = Pipeline::new();
    let delivery = dispatch(
        &p.state,
        json!({"id": "T", "user_id": "user", "title": "Once", "is_recurring": false}),
        Utc::now(),
    )
    .await;

    assert_eq!(delivery.ack, Ack::Success);
    assert_eq!(delivery.body["recurrence"], "ignored");
    assert_eq!(delivery.body["notification"], "ignored");
    assert!(p.tasks_of("user").is_empty());
    assert!(p.markers.is_empty());
}

#[tokio::test]
async fn missing_user_is_dropped() {
    let p = Pipeline::new();
    let delivery = dispatch(&p.state, json!({"id": "T", "is_recurring": true}), Utc::now()).await;
    assert_eq!(delivery.ack, Ack::Drop);
    assert!(p.markers.is_empty());
}

// =============================================================================
// Recurrence engine
// =============================================================================

#[tokio::test]
async fn unknown_pattern_recurs_daily() {
    let p = Pipeline::new();
    let event = TaskCompletedEvent::from_payload(recurring_event(
        "T",
        "fortnightly",
        "2024-02-28T10:00:00Z",
    ))
    .unwrap();

    let outcome = p.recurrence().handle(&event, Utc::now()).await.unwrap();
    match outcome {
        RecurrenceOutcome::Created { next_due, .. } => {
            assert_eq!(next_due, at(2024, 2, 29, 10, 0));
        }
        other => panic!("expected a successor, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_completion_time_falls_back_to_now() {
    let p = Pipeline::new();
    let event = TaskCompletedEvent::from_payload(json!({
        "id": "T",
        "user_id": "user",
        "title": "Standup",
        "is_recurring": true,
        "recurrence_pattern": "daily",
        "completed_at": "yesterday-ish"
    }))
    .unwrap();
    assert!(event.completed_at.is_none());

    let now = at(2024, 6, 15, 8, 30);
    let outcome = p.recurrence().handle(&event, now).await.unwrap();
    assert!(matches!(
        outcome,
        RecurrenceOutcome::Created { next_due, .. } if next_due == at(2024, 6, 16, 8, 30)
    ));
}

#[tokio::test]
async fn distinct_completions_of_same_task_each_recur() {
    let p = Pipeline::new();
    let engine = p.recurrence();
    let now = Utc::now();

    for completed_at in ["2024-01-01T00:00:00Z", "2024-01-08T00:00:00Z"] {
        let event =
            TaskCompletedEvent::from_payload(recurring_event("T", "weekly", completed_at)).unwrap();
        let outcome = engine.handle(&event, now).await.unwrap();
        assert!(matches!(outcome, RecurrenceOutcome::Created { .. }));
    }

    assert_eq!(p.tasks_of("user").len(), 2);
}

// =============================================================================
// Notification engine
// =============================================================================

#[tokio::test]
async fn completion_notification_once_per_day() {
    let p = Pipeline::new();
    let engine = p.notifications(BroadcastNotifier::new());
    let event =
        TaskCompletedEvent::from_payload(recurring_event("T", "daily", "2024-01-01T07:00:00Z"))
            .unwrap();

    let first = engine.on_task_completed(&event, at(2024, 1, 1, 7, 0)).await.unwrap();
    assert!(matches!(first, CompletionOutcome::Sent(ref n) if n.kind == MarkerKind::RecurringCompletion));

    let same_day = engine.on_task_completed(&event, at(2024, 1, 1, 22, 0)).await.unwrap();
    assert!(matches!(same_day, CompletionOutcome::Duplicate));

    let next_day = engine.on_task_completed(&event, at(2024, 1, 2, 7, 0)).await.unwrap();
    assert!(matches!(next_day, CompletionOutcome::Sent(_)));

    assert_eq!(p.markers.keys_with_prefix("notification:user:T:").len(), 2);
}

#[tokio::test]
async fn reminder_sweep_covers_window_only() {
    let p = Pipeline::new();
    let engine = p.notifications(BroadcastNotifier::new());
    let now = at(2024, 4, 1, 12, 0);

    let mut soon = Task::new("alice".into(), "File taxes".into());
    soon.due_date = Some(now + Duration::hours(2));
    soon.priority = TaskPriority::High;
    p.store.store_task(&soon).unwrap();

    let mut later = Task::new("alice".into(), "Renew passport".into());
    later.due_date = Some(now + Duration::hours(30));
    p.store.store_task(&later).unwrap();

    let mut overdue = Task::new("bob".into(), "Call back".into());
    overdue.due_date = Some(now - Duration::hours(1));
    p.store.store_task(&overdue).unwrap();

    let mut done = Task::new("bob".into(), "Already done".into());
    done.due_date = Some(now + Duration::hours(3));
    done.complete(now);
    p.store.store_task(&done).unwrap();

    let sweep = engine.reminder_sweep(now).await.unwrap();
    assert_eq!(sweep.status, "success");
    assert_eq!(sweep.notifications_sent, 1);
    assert_eq!(sweep.details[0].task_id, soon.id.to_string());
    assert_eq!(
        sweep.details[0].message,
        "URGENT: Reminder: 'File taxes' is due in 2 hours"
    );

    let again = engine.reminder_sweep(now + Duration::minutes(10)).await.unwrap();
    assert_eq!(again.notifications_sent, 0);
    assert_eq!(again.skipped, 1);

    assert_eq!(
        p.markers.keys_with_prefix("notification:alice:"),
        vec![format!("notification:alice:{}:2024-04-01:due_date_reminder", soon.id)]
    );
}

#[tokio::test]
async fn reminder_and_completion_markers_are_independent() {
    let p = Pipeline::new();
    let engine = p.notifications(BroadcastNotifier::new());
    let now = at(2024, 4, 2, 9, 0);

    let mut task = Task::new("user".into(), "Water plants".into())
        .with_recurrence(RecurrencePattern::Daily);
    task.due_date = Some(now + Duration::hours(1));
    p.store.store_task(&task).unwrap();

    let sweep = engine.reminder_sweep(now).await.unwrap();
    assert_eq!(sweep.notifications_sent, 1);

    let event = TaskCompletedEvent::from_task(&{
        let mut completed = task.clone();
        completed.complete(now);
        completed
    });
    let outcome = engine.on_task_completed(&event, now).await.unwrap();
    assert!(matches!(outcome, CompletionOutcome::Sent(_)));
}

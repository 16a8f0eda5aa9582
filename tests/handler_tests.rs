//! HTTP tests through the public router
//!
//! Each test builds a fresh local-mode service: RocksDB in a temp directory,
//! in-memory markers and the in-process bus. Requests go through
//! `build_router`, so auth and role gating are exercised as deployed.
//!
//! Run with: `cargo test --test handler_tests`

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use taskflow::{
    config::{ServerConfig, ServiceRole, SidecarConfig},
    handlers::{build_router, run_local_dispatcher, Components, ServiceState},
    sidecar::{LocalBus, MemoryStateStore},
    tasks::{Task, TaskStore},
};

// ═══════════════════════════════════════════════════════════════════════
// Test infrastructure
// ═══════════════════════════════════════════════════════════════════════

const TEST_KEY: &str = "handler-integration-key";

struct Harness {
    state: Arc<ServiceState>,
    store: Arc<TaskStore>,
    markers: MemoryStateStore,
    bus: LocalBus,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(TaskStore::new(dir.path()).expect("open task store"));
        let markers = MemoryStateStore::new();
        let bus = LocalBus::new();

        let cfg = ServerConfig {
            storage_path: dir.path().to_path_buf(),
            api_keys: vec![TEST_KEY.to_string()],
            sidecar: SidecarConfig {
                enabled: false,
                ..SidecarConfig::default()
            },
            ..ServerConfig::default()
        };
        let components = Components {
            task_store: Some(store.clone()),
            repository: store.clone(),
            state_store: Arc::new(markers.clone()),
            publisher: Arc::new(bus.clone()),
            local_bus: Some(bus.clone()),
            sidecar: None,
        };

        Self {
            state: Arc::new(ServiceState::assemble(cfg, ServiceRole::All, components)),
            store,
            markers,
            bus,
            _dir: dir,
        }
    }

    fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Mirror main.rs: attach the consumers to the in-process bus
    fn start_dispatcher(&self) {
        let receiver = self.bus.subscribe();
        tokio::spawn(run_local_dispatcher(self.state.clone(), receiver));
    }
}

// ── request helpers ──

fn request(method: Method, uri: &str, user: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_KEY)
        .header("x-user-id", user);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Poll until `check` holds or the deadline passes
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ═══════════════════════════════════════════════════════════════════════
// Auth
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn wrong_api_key_is_rejected() {
    let h = Harness::new();
    let req = Request::builder()
        .uri("/api/tasks")
        .header("x-api-key", "not-the-key")
        .header("x-user-id", "alice")
        .body(Body::empty())
        .unwrap();
    let resp = h.app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_user_header_is_rejected() {
    let h = Harness::new();
    let req = Request::builder()
        .uri("/api/tasks")
        .header("x-api-key", TEST_KEY)
        .body(Body::empty())
        .unwrap();
    let resp = h.app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn service_descriptor_lists_subscription() {
    let h = Harness::new();
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = send(h.app(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "taskflow all");
    assert_eq!(body["subscriptions"], json!(["task.completed"]));
}

// ═══════════════════════════════════════════════════════════════════════
// Task API
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tasks_are_scoped_to_their_owner() {
    let h = Harness::new();

    let (status, created) = send(
        h.app(),
        request(Method::POST, "/api/tasks", "alice", Some(&json!({"title": "Alice only"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(h.app(), request(Method::GET, &format!("/api/tasks/{id}"), "bob", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(h.app(), request(Method::GET, "/api/tasks", "bob", None)).await;
    assert_eq!(list["count"], 0);

    let (status, _) = send(
        h.app(),
        request(Method::DELETE, &format!("/api/tasks/{id}"), "bob", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        h.app(),
        request(Method::DELETE, &format!("/api/tasks/{id}"), "alice", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task deleted successfully");
}

#[tokio::test]
async fn completing_recurring_task_flows_to_successor() {
    let h = Harness::new();
    h.start_dispatcher();
    let mut inbox = h.state.notifier().subscribe();

    let (_, created) = send(
        h.app(),
        request(
            Method::POST,
            "/api/tasks",
            "alice",
            Some(&json!({"title": "Water plants", "is_recurring": true, "recurrence_pattern": "weekly"})),
        ),
    )
    .await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        h.app(),
        request(Method::PATCH, &format!("/api/tasks/{id}/complete"), "alice", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task marked as completed");
    assert_eq!(body["event_published"], true);

    let store = h.store.clone();
    let appeared = eventually(|| {
        store
            .list_tasks_for_user("alice", None)
            .map(|tasks| tasks.len() == 2)
            .unwrap_or(false)
    })
    .await;
    assert!(appeared, "successor task was not created");

    let tasks: Vec<Task> = h.store.list_tasks_for_user("alice", None).unwrap();
    let successor = tasks.iter().find(|t| t.id.to_string() != id).unwrap();
    assert!(successor.is_recurring);
    assert!(successor.completed_at.is_none());

    let notification = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("notification in time")
        .expect("notification delivered");
    assert_eq!(notification.task_id, id);
    assert_eq!(h.markers.keys_with_prefix("notification:alice:").len(), 1);
}

#[tokio::test]
async fn completing_twice_publishes_once() {
    let h = Harness::new();
    let mut bus = h.bus.subscribe();

    let (_, created) = send(
        h.app(),
        request(Method::POST, "/api/tasks", "alice", Some(&json!({"title": "Once"}))),
    )
    .await;
    let uri = format!("/api/tasks/{}/complete", created["id"].as_str().unwrap());

    let (_, first) = send(h.app(), request(Method::PATCH, &uri, "alice", None)).await;
    let (status, second) = send(h.app(), request(Method::PATCH, &uri, "alice", None)).await;
    assert_eq!(first["event_published"], true);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["event_published"], false);

    assert!(bus.recv().await.is_ok());
    assert!(bus.try_recv().is_err());
}

// ═══════════════════════════════════════════════════════════════════════
// Internal endpoints
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn internal_insert_and_due_query() {
    let h = Harness::new();

    let mut task = Task::new("carol".into(), "Pay rent".into());
    task.due_date = Some("2024-07-01T09:00:00Z".parse().unwrap());
    let payload = serde_json::to_value(&task).unwrap();

    let (status, body) = send(
        h.app(),
        request(Method::POST, "/internal/tasks", "recurrence-service", Some(&payload)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], task.id.to_string());

    let (status, body) = send(
        h.app(),
        request(
            Method::GET,
            "/internal/tasks/due?from=2024-07-01T00:00:00Z&to=2024-07-02T00:00:00Z",
            "notification-service",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["tasks"][0]["user_id"], "carol");

    let (_, body) = send(
        h.app(),
        request(
            Method::GET,
            "/internal/tasks/due?from=2024-07-01T09:00:00Z&to=2024-07-02T00:00:00Z",
            "notification-service",
            None,
        ),
    )
    .await;
    assert_eq!(body["count"], 0);
}

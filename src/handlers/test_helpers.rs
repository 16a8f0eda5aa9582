//! Shared test utilities for handler unit tests.
//!
//! Provides a [`TestHarness`] wired in local mode: a fresh RocksDB task store
//! in a temp directory, an in-memory state store and an in-process bus, plus
//! helpers for building authenticated requests and reading JSON bodies.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt; // for oneshot()

use super::router::{build_router, AppState};
use super::state::{Components, ServiceState};
use crate::config::{ServerConfig, ServiceRole, SidecarConfig};
use crate::sidecar::{BusMessage, LocalBus, MemoryStateStore};
use crate::tasks::{Task, TaskRepository, TaskStore};

/// Test API key used in all handler tests.
pub const TEST_API_KEY: &str = "test-handler-key-2025";

/// Caller identity sent with every request unless overridden.
pub const TEST_USER: &str = "test-user";

/// A self-contained test environment with its own temp storage.
///
/// Holds `TempDir` so the directory isn't cleaned up until the harness drops.
pub struct TestHarness {
    pub state: AppState,
    pub markers: MemoryStateStore,
    bus: LocalBus,
    store: Arc<TaskStore>,
    _temp_dir: TempDir,
}

impl TestHarness {
    /// All services in one process, sidecar disabled.
    pub fn new() -> Self {
        Self::with_role(ServiceRole::All)
    }

    pub fn with_role(role: ServiceRole) -> Self {
        Self::build(role, |store| store as Arc<dyn TaskRepository>)
    }

    /// All services, with the consumers reaching tasks through `wrap`.
    pub fn with_repository<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<TaskStore>) -> Arc<dyn TaskRepository>,
    {
        Self::build(ServiceRole::All, wrap)
    }

    fn build<F>(role: ServiceRole, wrap: F) -> Self
    where
        F: FnOnce(Arc<TaskStore>) -> Arc<dyn TaskRepository>,
    {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = ServerConfig {
            storage_path: temp_dir.path().to_path_buf(),
            api_keys: vec![TEST_API_KEY.to_string()],
            sidecar: SidecarConfig {
                enabled: false,
                ..SidecarConfig::default()
            },
            ..ServerConfig::default()
        };

        let store = Arc::new(TaskStore::new(temp_dir.path()).expect("failed to open task store"));
        let markers = MemoryStateStore::new();
        let bus = LocalBus::new();

        let components = Components {
            task_store: Some(store.clone()),
            repository: wrap(store.clone()),
            state_store: Arc::new(markers.clone()),
            publisher: Arc::new(bus.clone()),
            local_bus: Some(bus.clone()),
            sidecar: None,
        };

        Self {
            state: Arc::new(ServiceState::assemble(config, role, components)),
            markers,
            bus,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Build the full application router (public + protected routes).
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Persist a task directly, bypassing the API.
    pub fn seed_task(&self, task: Task) -> Task {
        self.store.store_task(&task).expect("failed to seed task");
        task
    }

    /// Observe events published on the in-process bus.
    pub fn subscribe_bus(&self) -> broadcast::Receiver<BusMessage> {
        self.bus.subscribe()
    }
}

// ---------- Request builders ----------

fn authed(method: Method, uri: &str, user_id: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_API_KEY)
        .header("x-user-id", user_id)
}

/// Build a GET request to `uri` with the test API key and user.
pub fn get(uri: &str) -> Request<Body> {
    get_as(uri, TEST_USER)
}

/// Build a GET request as a specific user.
pub fn get_as(uri: &str, user_id: &str) -> Request<Body> {
    authed(Method::GET, uri, user_id)
        .body(Body::empty())
        .unwrap()
}

/// Build a POST request to `uri` with a JSON body.
pub fn post_json<T: serde::Serialize>(uri: &str, body: &T) -> Request<Body> {
    let json = serde_json::to_string(body).unwrap();
    authed(Method::POST, uri, TEST_USER)
        .header("content-type", "application/json")
        .body(Body::from(json))
        .unwrap()
}

/// Build a PUT request to `uri` with a JSON body.
pub fn put_json<T: serde::Serialize>(uri: &str, body: &T) -> Request<Body> {
    let json = serde_json::to_string(body).unwrap();
    authed(Method::PUT, uri, TEST_USER)
        .header("content-type", "application/json")
        .body(Body::from(json))
        .unwrap()
}

/// Build a PATCH request with no body.
pub fn patch(uri: &str) -> Request<Body> {
    authed(Method::PATCH, uri, TEST_USER)
        .body(Body::empty())
        .unwrap()
}

/// Build a DELETE request to `uri`.
pub fn delete(uri: &str) -> Request<Body> {
    authed(Method::DELETE, uri, TEST_USER)
        .body(Body::empty())
        .unwrap()
}

/// Build a POST request **without** an API key (public routes, auth rejection).
pub fn post_json_unauthenticated<T: serde::Serialize>(uri: &str, body: &T) -> Request<Body> {
    let json = serde_json::to_string(body).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json))
        .unwrap()
}

/// Build a GET request **without** an API key.
pub fn get_unauthenticated(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// ---------- Response helpers ----------

/// Send a request through the router and return (status, JSON body).
pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body_bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body_bytes).to_string())
        })
    };
    (status, json)
}

//! taskflow
//!
//! Event-driven services behind a multi-user todo backend.
//!
//! # Event flow
//! - The task API commits a completion, then publishes `task.completed`
//! - The recurrence engine creates the next instance of recurring tasks
//! - The notification engine notifies about completed recurring tasks and
//!   sweeps for tasks due soon
//!
//! Delivery is at-least-once and unordered. Every consumer side effect is
//! gated by an atomic create-if-absent marker in the state store.
//!
//! # Deployment
//! - With a sidecar: bus, state store and service invocation over HTTP
//! - Local mode: in-process bus and in-memory state store, all services in
//!   one process

pub mod auth;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod markers;
pub mod metrics;
pub mod middleware;
pub mod notifications;
pub mod recurrence;
pub mod sidecar;
pub mod tasks;
pub mod tracing_setup;
pub mod validation;

// Re-export dependencies to ensure tests use the same version
pub use chrono;
pub use uuid;

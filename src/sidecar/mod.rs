//! Sidecar façade: pub/sub publishing, key-value state and service invocation
//!
//! The consumers only see the [`EventPublisher`] and [`StateStore`] traits.
//! [`SidecarClient`] talks to a co-located sidecar over HTTP; [`MemoryStateStore`]
//! and [`LocalBus`] provide the same contracts in-process.

pub mod client;
pub mod local_bus;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

pub use client::SidecarClient;
pub use local_bus::{BusMessage, LocalBus};
pub use memory::MemoryStateStore;

/// Errors talking to the sidecar or an in-process stand-in
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} response could not be decoded: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Unavailable(String),
}

impl SidecarError {
    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SidecarError::Transport { .. } | SidecarError::Unavailable(_) => true,
            SidecarError::Status { status, .. } => *status >= 500 || *status == 429,
            SidecarError::Decode { .. } => false,
        }
    }
}

/// Publishes JSON payloads to a named topic
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), SidecarError>;
}

/// Key-value state store used for idempotency markers
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a value; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>, SidecarError>;

    /// Unconditional write (last write wins)
    async fn save(&self, key: &str, value: &Value) -> Result<(), SidecarError>;

    /// Atomic insert; `Ok(false)` when the key already exists
    async fn create_if_absent(&self, key: &str, value: &Value) -> Result<bool, SidecarError>;

    async fn delete(&self, key: &str) -> Result<(), SidecarError>;
}

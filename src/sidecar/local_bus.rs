//! In-process pub/sub bus for local mode
//!
//! Publishing fans a message out over a tokio broadcast channel. A dispatcher
//! (see `handlers::pubsub::run_local_dispatcher`) feeds each message to the
//! consumers. Nothing is persisted: a message published while no dispatcher is
//! subscribed is reported as an error to the publisher.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{EventPublisher, SidecarError};
use crate::constants::BROADCAST_CAPACITY;

/// A message on the local bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for LocalBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), SidecarError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        };

        self.sender
            .send(message)
            .map(|_| ())
            .map_err(|_| SidecarError::Unavailable("local bus has no subscribers".to_string()))
    }
}

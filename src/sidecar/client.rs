//! HTTP client for the sidecar façade
//!
//! One instance per process, constructed from [`SidecarConfig`] and shared by
//! `Arc`. The underlying `reqwest::Client` keeps the connection pool; it is
//! released when the last handle drops.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, StatusCode, Url};
use serde_json::{json, Value};

use super::{EventPublisher, SidecarError, StateStore};
use crate::config::SidecarConfig;
use crate::metrics::SIDECAR_REQUEST_DURATION;
use crate::tasks::repository::TaskRepository;
use crate::tasks::Task;

/// Client for the sidecar's pub/sub, state and invocation APIs
#[derive(Debug, Clone)]
pub struct SidecarClient {
    base: Url,
    pubsub_name: String,
    state_store: String,
    tasks_app_id: String,
    tasks_api_key: Option<String>,
    client: reqwest::Client,
}

impl SidecarClient {
    pub fn new(config: &SidecarConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid sidecar URL '{}'", config.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Sidecar URL '{}' cannot be a base URL", config.base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(16)
            .build()
            .context("Failed to build sidecar HTTP client")?;

        Ok(Self {
            base,
            pubsub_name: config.pubsub_name.clone(),
            state_store: config.state_store.clone(),
            tasks_app_id: config.tasks_app_id.clone(),
            tasks_api_key: config.tasks_api_key.clone(),
            client,
        })
    }

    /// Build `{base}/{segments..}`, percent-encoding each segment
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SidecarError> {
        let _timer = SIDECAR_REQUEST_DURATION
            .with_label_values(&[operation])
            .start_timer();

        request
            .send()
            .await
            .map_err(|source| SidecarError::Transport { operation, source })
    }

    async fn status_error(operation: &'static str, response: reqwest::Response) -> SidecarError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SidecarError::Status {
            operation,
            status,
            body,
        }
    }

    /// Sidecar liveness (`GET /v1.0/healthz`)
    pub async fn healthy(&self) -> bool {
        match self
            .send("healthz", self.client.get(self.url(&["v1.0", "healthz"])))
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Service invocation: `{base}/v1.0/invoke/{app_id}/method/{method..}`
    ///
    /// Returns the decoded JSON body, `None` for empty 2xx responses.
    pub async fn invoke(
        &self,
        app_id: &str,
        method: &[&str],
        verb: Method,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, SidecarError> {
        const OPERATION: &str = "invoke";

        let mut segments = vec!["v1.0", "invoke", app_id, "method"];
        segments.extend_from_slice(method);
        let mut url = self.url(&segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }

        let mut request = self.client.request(verb, url);
        if let Some(ref key) = self.tasks_api_key {
            request = request.header(crate::auth::API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.send(OPERATION, request).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(OPERATION, response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| SidecarError::Transport {
                operation: OPERATION,
                source,
            })?;
        if bytes.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SidecarError::Decode {
                operation: OPERATION,
                source,
            })
    }
}

#[async_trait]
impl EventPublisher for SidecarClient {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), SidecarError> {
        const OPERATION: &str = "publish";

        let url = self.url(&["v1.0", "publish", &self.pubsub_name, topic]);
        let response = self
            .send(OPERATION, self.client.post(url).json(payload))
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(OPERATION, response).await)
        }
    }
}

#[async_trait]
impl StateStore for SidecarClient {
    async fn get(&self, key: &str) -> Result<Option<Value>, SidecarError> {
        const OPERATION: &str = "state.get";

        let url = self.url(&["v1.0", "state", &self.state_store, key]);
        let response = self.send(OPERATION, self.client.get(url)).await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(Self::status_error(OPERATION, response).await)
            }
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| SidecarError::Transport {
                operation: OPERATION,
                source,
            })?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SidecarError::Decode {
                operation: OPERATION,
                source,
            })
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), SidecarError> {
        const OPERATION: &str = "state.save";

        let url = self.url(&["v1.0", "state", &self.state_store]);
        let body = json!([{ "key": key, "value": value }]);
        let response = self.send(OPERATION, self.client.post(url).json(&body)).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(OPERATION, response).await)
        }
    }

    async fn create_if_absent(&self, key: &str, value: &Value) -> Result<bool, SidecarError> {
        const OPERATION: &str = "state.create";

        // first-write without an etag is an insert: the store rejects it with 409 if the key exists
        let url = self.url(&["v1.0", "state", &self.state_store]);
        let body = json!([{
            "key": key,
            "value": value,
            "options": { "concurrency": "first-write", "consistency": "strong" }
        }]);
        let response = self.send(OPERATION, self.client.post(url).json(&body)).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(Self::status_error(OPERATION, response).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SidecarError> {
        const OPERATION: &str = "state.delete";

        let url = self.url(&["v1.0", "state", &self.state_store, key]);
        let response = self.send(OPERATION, self.client.delete(url)).await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::status_error(OPERATION, response).await)
        }
    }
}

/// Task store reached through service invocation of the API service
#[async_trait]
impl TaskRepository for SidecarClient {
    async fn insert_task(&self, task: &Task) -> anyhow::Result<()> {
        let body = serde_json::to_value(task).context("Failed to serialize task")?;
        self.invoke(
            &self.tasks_app_id,
            &["internal", "tasks"],
            Method::POST,
            &[],
            Some(&body),
        )
        .await
        .context("Failed to insert task through service invocation")?;
        Ok(())
    }

    async fn pending_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>> {
        let query = [
            ("from", from.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ("to", to.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ];
        let body = self
            .invoke(
                &self.tasks_app_id,
                &["internal", "tasks", "due"],
                Method::GET,
                &query,
                None,
            )
            .await
            .context("Failed to query due tasks through service invocation")?
            .context("Empty response from due task query")?;

        let tasks = body
            .get("tasks")
            .cloned()
            .context("Due task response has no 'tasks' field")?;
        serde_json::from_value(tasks).context("Failed to decode due tasks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> SidecarClient {
        let config = SidecarConfig {
            base_url: base.to_string(),
            ..SidecarConfig::default()
        };
        SidecarClient::new(&config).unwrap()
    }

    #[test]
    fn test_state_urls_are_encoded() {
        let c = client("http://localhost:3500");
        let url = c.url(&["v1.0", "state", "statestore", "notification:u1:t/1:2024-01-01"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:3500/v1.0/state/statestore/notification:u1:t%2F1:2024-01-01"
        );
    }

    #[test]
    fn test_publish_url() {
        let c = client("http://localhost:3501/");
        let url = c.url(&["v1.0", "publish", "pubsub", "task.completed"]);
        assert_eq!(url.as_str(), "http://localhost:3501/v1.0/publish/pubsub/task.completed");
    }

    #[test]
    fn test_rejects_invalid_base() {
        let config = SidecarConfig {
            base_url: "not a url".to_string(),
            ..SidecarConfig::default()
        };
        assert!(SidecarClient::new(&config).is_err());
    }
}

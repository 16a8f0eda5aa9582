//! Configuration management for taskflow
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults for local development, configurable in production.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::constants::{
    DEFAULT_PUBSUB_NAME, DEFAULT_REMINDER_WINDOW_HOURS, DEFAULT_SIDECAR_HTTP_PORT,
    DEFAULT_STATE_STORE, DEFAULT_TASKS_APP_ID, TASK_COMPLETED_TOPIC,
};

/// Which services this process hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceRole {
    /// API, recurrence and notification services in one process
    All,
    /// Task API and completion publisher
    Api,
    /// Recurring task generator
    Recurrence,
    /// Notification and reminder service
    Notification,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::All => "all",
            ServiceRole::Api => "api",
            ServiceRole::Recurrence => "recurrence",
            ServiceRole::Notification => "notification",
        }
    }

    /// Hosts the task API and owns the task store
    pub fn serves_tasks(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Api)
    }

    pub fn runs_recurrence(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Recurrence)
    }

    pub fn runs_notifications(&self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Notification)
    }

    /// Subscribes to `task.completed`
    pub fn consumes_events(&self) -> bool {
        self.runs_recurrence() || self.runs_notifications()
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all)
    pub allowed_origins: Vec<String>,
    /// Max age for preflight cache (seconds)
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 86400,
        }
    }
}

impl CorsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(origins) = env::var("TASKFLOW_CORS_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(val) = env::var("TASKFLOW_CORS_MAX_AGE") {
            if let Ok(n) = val.parse() {
                config.max_age_seconds = n;
            }
        }

        config
    }

    /// Check if any origin restrictions are configured
    pub fn is_restricted(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    /// Convert to tower-http CorsLayer
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use tower_http::cors::{AllowOrigin, Any, CorsLayer};

        let mut layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        if self.allowed_origins.is_empty() {
            layer = layer.allow_origin(Any);
        } else {
            let valid_origins: Vec<axum::http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("CORS: Invalid origin '{}' - skipping", origin);
                        None
                    }
                })
                .collect();

            // An empty list denies every cross-origin request, never falls back to Any
            layer = layer.allow_origin(AllowOrigin::list(valid_origins));
        }

        layer.max_age(Duration::from_secs(self.max_age_seconds))
    }
}

/// Sidecar façade (pub/sub, state store, service invocation) configuration
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// When false the process runs with an in-process bus and memory state store
    pub enabled: bool,

    /// Base URL of the sidecar HTTP API (default: http://localhost:3500)
    pub base_url: String,

    /// Pub/sub component name (default: pubsub)
    pub pubsub_name: String,

    /// Topic for completion events (default: task.completed)
    pub topic: String,

    /// State store component name (default: statestore)
    pub state_store: String,

    /// App id of the task API service (default: backend)
    pub tasks_app_id: String,

    /// API key sent on service invocation calls to the task API
    pub tasks_api_key: Option<String>,

    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: format!("http://localhost:{DEFAULT_SIDECAR_HTTP_PORT}"),
            pubsub_name: DEFAULT_PUBSUB_NAME.to_string(),
            topic: TASK_COMPLETED_TOPIC.to_string(),
            state_store: DEFAULT_STATE_STORE.to_string(),
            tasks_app_id: DEFAULT_TASKS_APP_ID.to_string(),
            tasks_api_key: None,
            timeout_secs: 10,
        }
    }
}

impl SidecarConfig {
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("TASKFLOW_SIDECAR") {
            let val = val.to_lowercase();
            config.enabled = !(val == "off" || val == "false" || val == "0");
        }

        if let Ok(url) = env::var("TASKFLOW_SIDECAR_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        } else if let Ok(port) = env::var("DAPR_HTTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.base_url = format!("http://localhost:{port}");
            }
        }

        if let Ok(val) = env::var("TASKFLOW_PUBSUB_NAME") {
            config.pubsub_name = val;
        }

        if let Ok(val) = env::var("TASKFLOW_STATE_STORE") {
            config.state_store = val;
        }

        if let Ok(val) = env::var("TASKFLOW_TASKS_APP_ID") {
            config.tasks_app_id = val;
        }

        if let Ok(val) = env::var("TASKFLOW_TASKS_API_KEY") {
            if !val.trim().is_empty() {
                config.tasks_api_key = Some(val.trim().to_string());
            }
        }

        if let Ok(val) = env::var("TASKFLOW_SIDECAR_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.timeout_secs = n;
            }
        }

        config
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Server configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host address (default: 127.0.0.1)
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Storage path for the RocksDB task store (default: ./taskflow_data)
    pub storage_path: PathBuf,

    /// Accepted API keys for protected routes
    pub api_keys: Vec<String>,

    /// Maximum concurrent requests (default: 200)
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    /// Whether running in production mode
    pub is_production: bool,

    /// Reminder look-ahead window in hours (default: 24)
    pub reminder_window_hours: i64,

    /// In-process reminder sweep period in seconds (default: 0 = external scheduler)
    pub sweep_interval_secs: u64,

    /// Emit JSON log lines instead of text
    pub json_logs: bool,

    /// CORS configuration
    pub cors: CorsConfig,

    /// Sidecar configuration
    pub sidecar: SidecarConfig,
}

/// Key accepted in development when no keys are configured
pub const DEV_API_KEY: &str = "taskflow-dev-key";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            storage_path: PathBuf::from("./taskflow_data"),
            api_keys: Vec::new(),
            max_concurrent_requests: 200,
            request_timeout_secs: 30,
            is_production: false,
            reminder_window_hours: DEFAULT_REMINDER_WINDOW_HOURS,
            sweep_interval_secs: 0,
            json_logs: false,
            cors: CorsConfig::default(),
            sidecar: SidecarConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.is_production = env::var("TASKFLOW_ENV")
            .map(|v| {
                let v = v.to_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        if let Ok(val) = env::var("TASKFLOW_HOST") {
            config.host = val;
        }

        if let Ok(val) = env::var("TASKFLOW_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if let Ok(val) = env::var("TASKFLOW_DATA_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        if let Ok(keys) = env::var("TASKFLOW_API_KEYS") {
            config.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }

        if let Ok(val) = env::var("TASKFLOW_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_requests = n;
            }
        }

        if let Ok(val) = env::var("TASKFLOW_REQUEST_TIMEOUT") {
            if let Ok(n) = val.parse() {
                config.request_timeout_secs = n;
            }
        }

        if let Ok(val) = env::var("TASKFLOW_REMINDER_WINDOW_HOURS") {
            if let Ok(n) = val.parse::<i64>() {
                config.reminder_window_hours = n.clamp(1, 24 * 14);
            }
        }

        if let Ok(val) = env::var("TASKFLOW_SWEEP_INTERVAL") {
            if let Ok(n) = val.parse() {
                config.sweep_interval_secs = n;
            }
        }

        if let Ok(val) = env::var("TASKFLOW_LOG_FORMAT") {
            config.json_logs = val.eq_ignore_ascii_case("json");
        }

        config.cors = CorsConfig::from_env();
        config.sidecar = SidecarConfig::from_env();

        if config.is_production && config.api_keys.is_empty() {
            tracing::warn!("TASKFLOW_API_KEYS not set in production - protected routes will reject all requests");
        }

        config
    }

    /// Keys accepted by the auth middleware
    ///
    /// Development falls back to [`DEV_API_KEY`]; production never does.
    pub fn effective_api_keys(&self) -> Vec<String> {
        if !self.api_keys.is_empty() || self.is_production {
            self.api_keys.clone()
        } else {
            vec![DEV_API_KEY.to_string()]
        }
    }

    /// Key sent when invoking the task API through the sidecar
    ///
    /// Development falls back to [`DEV_API_KEY`], matching the task API's own
    /// fallback; production requires `TASKFLOW_TASKS_API_KEY`.
    pub fn effective_tasks_api_key(&self) -> Option<String> {
        match self.sidecar.tasks_api_key {
            Some(ref key) => Some(key.clone()),
            None if !self.is_production => Some(DEV_API_KEY.to_string()),
            None => None,
        }
    }

    /// Sidecar settings with the invocation key resolved
    pub fn sidecar_client_config(&self) -> SidecarConfig {
        SidecarConfig {
            tasks_api_key: self.effective_tasks_api_key(),
            ..self.sidecar.clone()
        }
    }

    /// Check the role/sidecar combination is runnable
    pub fn validate_for(&self, role: ServiceRole) -> anyhow::Result<()> {
        if !self.sidecar.enabled && role != ServiceRole::All {
            anyhow::bail!(
                "service role '{}' needs the sidecar; TASKFLOW_SIDECAR=off is only supported with --service all",
                role.as_str()
            );
        }
        if self.sidecar.enabled && !role.serves_tasks() && self.effective_tasks_api_key().is_none() {
            anyhow::bail!(
                "service role '{}' invokes the task API; set TASKFLOW_TASKS_API_KEY to one of its API keys",
                role.as_str()
            );
        }
        Ok(())
    }

    /// Log the current configuration
    pub fn log(&self, role: ServiceRole) {
        info!("📋 Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Service: {}", role.as_str());
        info!("   Listen: {}:{}", self.host, self.port);
        if role.serves_tasks() {
            info!("   Storage: {:?}", self.storage_path);
        }
        info!("   Max concurrent: {}", self.max_concurrent_requests);
        info!("   Request timeout: {}s", self.request_timeout_secs);
        if self.sidecar.enabled {
            info!(
                "   Sidecar: {} (pubsub={}, topic={}, store={})",
                self.sidecar.base_url,
                self.sidecar.pubsub_name,
                self.sidecar.topic,
                self.sidecar.state_store
            );
        } else {
            info!("   Sidecar: disabled (in-process bus, memory state store)");
        }
        info!("   Reminder window: {}h", self.reminder_window_hours);
        if self.sweep_interval_secs > 0 {
            info!("   Reminder sweep: every {}s", self.sweep_interval_secs);
        } else {
            info!("   Reminder sweep: external scheduler");
        }
        if self.cors.is_restricted() {
            info!("   CORS origins: {:?}", self.cors.allowed_origins);
        } else {
            info!("   CORS: Permissive (all origins allowed)");
        }
    }
}

/// Environment variable documentation
pub fn print_env_help() {
    println!("taskflow Configuration Environment Variables:");
    println!();
    println!("  TASKFLOW_SERVICE               - all | api | recurrence | notification (default: all)");
    println!("  TASKFLOW_ENV                   - Set to 'production' or 'prod' for production mode");
    println!("  TASKFLOW_HOST                  - Bind address (default: 127.0.0.1)");
    println!("  TASKFLOW_PORT                  - Server port (default: 8000)");
    println!("  TASKFLOW_DATA_PATH             - Task store directory (default: ./taskflow_data)");
    println!("  TASKFLOW_API_KEYS              - Comma-separated API keys (required in production)");
    println!("  TASKFLOW_MAX_CONCURRENT        - Max concurrent requests (default: 200)");
    println!("  TASKFLOW_REQUEST_TIMEOUT       - Request timeout in seconds (default: 30)");
    println!("  TASKFLOW_REMINDER_WINDOW_HOURS - Reminder look-ahead in hours (default: 24)");
    println!("  TASKFLOW_SWEEP_INTERVAL        - In-process reminder sweep seconds (default: 0 = off)");
    println!("  TASKFLOW_LOG_FORMAT            - text | json (default: text)");
    println!();
    println!("Sidecar:");
    println!("  TASKFLOW_SIDECAR               - on | off (default: on)");
    println!("  TASKFLOW_SIDECAR_URL           - Sidecar base URL (default: http://localhost:$DAPR_HTTP_PORT)");
    println!("  DAPR_HTTP_PORT                 - Sidecar HTTP port (default: 3500)");
    println!("  TASKFLOW_PUBSUB_NAME           - Pub/sub component (default: pubsub)");
    println!("  TASKFLOW_STATE_STORE           - State store component (default: statestore)");
    println!("  TASKFLOW_TASKS_APP_ID          - App id of the task API (default: backend)");
    println!("  TASKFLOW_TASKS_API_KEY         - API key for service invocation of the task API");
    println!("  TASKFLOW_SIDECAR_TIMEOUT       - Sidecar request timeout seconds (default: 10)");
    println!();
    println!("CORS:");
    println!("  TASKFLOW_CORS_ORIGINS          - Comma-separated allowed origins (default: all)");
    println!("  TASKFLOW_CORS_MAX_AGE          - Preflight cache seconds (default: 86400)");
    println!();
    println!("  RUST_LOG                       - Log level (e.g., info, debug, trace)");
    println!();
}

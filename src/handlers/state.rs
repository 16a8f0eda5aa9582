//! Service state shared by every handler
//!
//! Everything a handler needs is constructed once here and injected through
//! axum's `State`: the task store (API roles), the sidecar client or its
//! in-process stand-ins, the two consumers and the notification channel.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::auth::ApiKeys;
use crate::config::{ServerConfig, ServiceRole};
use crate::events::CompletionPublisher;
use crate::markers::IdempotencyGate;
use crate::notifications::{BroadcastNotifier, NotificationEngine};
use crate::recurrence::RecurrenceEngine;
use crate::sidecar::{
    EventPublisher, LocalBus, MemoryStateStore, SidecarClient, StateStore,
};
use crate::tasks::{TaskRepository, TaskStore};

/// Collaborators the service is wired from
///
/// [`ServiceState::new`] derives these from configuration; tests assemble
/// their own.
pub struct Components {
    /// Local task store, present when the role serves the task API
    pub task_store: Option<Arc<TaskStore>>,
    /// Task access for the consumers
    pub repository: Arc<dyn TaskRepository>,
    pub state_store: Arc<dyn StateStore>,
    pub publisher: Arc<dyn EventPublisher>,
    /// In-process bus when the sidecar is disabled
    pub local_bus: Option<LocalBus>,
    pub sidecar: Option<Arc<SidecarClient>>,
}

impl Components {
    /// Local mode: RocksDB tasks, in-memory markers, in-process bus
    pub fn local(task_store: Arc<TaskStore>) -> Self {
        let bus = LocalBus::new();
        Self {
            repository: task_store.clone(),
            task_store: Some(task_store),
            state_store: Arc::new(MemoryStateStore::new()),
            publisher: Arc::new(bus.clone()),
            local_bus: Some(bus),
            sidecar: None,
        }
    }

    /// Sidecar mode. Roles without the task API reach tasks through service invocation.
    pub fn sidecar(client: Arc<SidecarClient>, task_store: Option<Arc<TaskStore>>) -> Self {
        let repository: Arc<dyn TaskRepository> = match task_store {
            Some(ref store) => store.clone(),
            None => client.clone(),
        };
        Self {
            task_store,
            repository,
            state_store: client.clone(),
            publisher: client.clone(),
            local_bus: None,
            sidecar: Some(client),
        }
    }
}

pub struct ServiceState {
    config: ServerConfig,
    role: ServiceRole,
    api_keys: ApiKeys,
    task_store: Option<Arc<TaskStore>>,
    publisher: Option<CompletionPublisher>,
    recurrence: Option<RecurrenceEngine>,
    notifications: Option<NotificationEngine>,
    notifier: BroadcastNotifier,
    local_bus: Option<LocalBus>,
    sidecar: Option<Arc<SidecarClient>>,
    started_at: DateTime<Utc>,
}

impl ServiceState {
    /// Build the state for `role` from configuration
    pub fn new(config: ServerConfig, role: ServiceRole) -> Result<Self> {
        config.validate_for(role)?;

        let task_store = if role.serves_tasks() {
            std::fs::create_dir_all(&config.storage_path).with_context(|| {
                format!("Failed to create storage path {:?}", config.storage_path)
            })?;
            Some(Arc::new(TaskStore::new(&config.storage_path)?))
        } else {
            None
        };

        let components = if config.sidecar.enabled {
            let client = Arc::new(SidecarClient::new(&config.sidecar_client_config())?);
            Components::sidecar(client, task_store)
        } else {
            let store = task_store.context("local mode requires the task store")?;
            Components::local(store)
        };

        Ok(Self::assemble(config, role, components))
    }

    /// Wire engines and publisher for `role` on top of `components`
    pub fn assemble(config: ServerConfig, role: ServiceRole, components: Components) -> Self {
        let notifier = BroadcastNotifier::new();
        let gate = IdempotencyGate::new(components.state_store.clone());

        let publisher = role.serves_tasks().then(|| {
            CompletionPublisher::new(components.publisher.clone(), config.sidecar.topic.clone())
        });

        let recurrence = role
            .runs_recurrence()
            .then(|| RecurrenceEngine::new(components.repository.clone(), gate.clone()));

        let notifications = role.runs_notifications().then(|| {
            NotificationEngine::new(
                components.repository.clone(),
                gate.clone(),
                Arc::new(notifier.clone()),
                Duration::hours(config.reminder_window_hours),
            )
        });

        let api_keys = ApiKeys::new(config.effective_api_keys());

        info!(
            role = role.as_str(),
            task_api = publisher.is_some(),
            recurrence = recurrence.is_some(),
            notifications = notifications.is_some(),
            local_bus = components.local_bus.is_some(),
            "Service state assembled"
        );

        Self {
            config,
            role,
            api_keys,
            task_store: components.task_store,
            publisher,
            recurrence,
            notifications,
            notifier,
            local_bus: components.local_bus,
            sidecar: components.sidecar,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn role(&self) -> ServiceRole {
        self.role
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.api_keys
    }

    pub fn task_store(&self) -> Option<&Arc<TaskStore>> {
        self.task_store.as_ref()
    }

    pub fn publisher(&self) -> Option<&CompletionPublisher> {
        self.publisher.as_ref()
    }

    pub fn recurrence(&self) -> Option<&RecurrenceEngine> {
        self.recurrence.as_ref()
    }

    pub fn notifications(&self) -> Option<&NotificationEngine> {
        self.notifications.as_ref()
    }

    pub fn notifier(&self) -> &BroadcastNotifier {
        &self.notifier
    }

    pub fn local_bus(&self) -> Option<&LocalBus> {
        self.local_bus.as_ref()
    }

    pub fn sidecar(&self) -> Option<&Arc<SidecarClient>> {
        self.sidecar.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Flush durable state before exit
    pub fn flush(&self) -> Result<()> {
        if let Some(store) = &self.task_store {
            store.flush()?;
            info!("Task store flushed");
        }
        Ok(())
    }
}

//! The slice of the task store the event consumers depend on
//!
//! In the combined process this is the local [`TaskStore`]; a standalone
//! consumer reaches the API service's store through service invocation
//! (see [`crate::sidecar::SidecarClient`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Task, TaskStore};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task row. Consumers never mutate existing tasks.
    async fn insert_task(&self, task: &Task) -> anyhow::Result<()>;

    /// Pending tasks of every user with `due_date` in `(from, to]`
    async fn pending_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>>;
}

#[async_trait]
impl TaskRepository for TaskStore {
    async fn insert_task(&self, task: &Task) -> anyhow::Result<()> {
        self.store_task(task)
    }

    async fn pending_due_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Task>> {
        TaskStore::pending_due_between(self, from, to)
    }
}

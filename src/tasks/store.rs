//! RocksDB-backed task store
//!
//! Two databases under `{storage_path}/tasks`:
//! - `items`: key = `{user_id}:{task_id}`, value = JSON task
//! - `index`: `user:{user_id}:{task_id}` for listing and
//!   `due:{timestamp:020}:{user_id}:{task_id}` for pending tasks with a due date
//!
//! The due index only holds pending tasks, so the reminder sweep is a single
//! ordered range scan.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

use super::types::{Task, TaskId, TaskStatus};

/// Result of a completion request
#[derive(Debug, Clone)]
pub struct Completion {
    pub task: Task,
    /// False when the task was already completed before this call
    pub newly_completed: bool,
}

/// Storage and query engine for tasks
pub struct TaskStore {
    task_db: Arc<DB>,
    index_db: Arc<DB>,
    /// Serializes read-modify-write on a single task (modify, complete)
    write_lock: Mutex<()>,
}

fn due_index_key(due: &DateTime<Utc>, user_id: &str, task_id: &TaskId) -> String {
    format!("due:{:020}:{}:{}", due.timestamp().max(0), user_id, task_id.0)
}

fn due_bound(at: &DateTime<Utc>) -> String {
    format!("due:{:020}:", at.timestamp().max(0))
}

impl TaskStore {
    /// Create a new task store at the given path
    pub fn new(storage_path: &Path) -> Result<Self> {
        let tasks_path = storage_path.join("tasks");
        std::fs::create_dir_all(&tasks_path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_max_write_buffer_number(2);
        opts.set_write_buffer_size(16 * 1024 * 1024);

        let task_db =
            Arc::new(DB::open(&opts, tasks_path.join("items")).context("Failed to open tasks DB")?);
        let index_db = Arc::new(
            DB::open(&opts, tasks_path.join("index")).context("Failed to open tasks index DB")?,
        );

        tracing::info!("Task store initialized");

        Ok(Self {
            task_db,
            index_db,
            write_lock: Mutex::new(()),
        })
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Store a task (insert or overwrite) and index it
    pub fn store_task(&self, task: &Task) -> Result<()> {
        let key = format!("{}:{}", task.user_id, task.id.0);
        let value = serde_json::to_vec(task).context("Failed to serialize task")?;

        self.task_db
            .put(key.as_bytes(), &value)
            .context("Failed to store task")?;

        self.update_task_indices(task)?;

        tracing::debug!(
            task_id = %task.id,
            user_id = %task.user_id,
            status = task.status.as_str(),
            "Stored task"
        );

        Ok(())
    }

    fn update_task_indices(&self, task: &Task) -> Result<()> {
        let mut batch = WriteBatch::default();

        let user_key = format!("user:{}:{}", task.user_id, task.id.0);
        batch.put(user_key.as_bytes(), b"1");

        if task.status == TaskStatus::Pending {
            if let Some(ref due) = task.due_date {
                batch.put(due_index_key(due, &task.user_id, &task.id).as_bytes(), b"1");
            }
        }

        self.index_db
            .write(batch)
            .context("Failed to update task indices")?;

        Ok(())
    }

    fn remove_task_indices(&self, task: &Task) -> Result<()> {
        let mut batch = WriteBatch::default();

        let user_key = format!("user:{}:{}", task.user_id, task.id.0);
        batch.delete(user_key.as_bytes());

        if let Some(ref due) = task.due_date {
            batch.delete(due_index_key(due, &task.user_id, &task.id).as_bytes());
        }

        self.index_db.write(batch)?;
        Ok(())
    }

    /// Get a task by ID, scoped to its owner
    pub fn get_task(&self, user_id: &str, task_id: &TaskId) -> Result<Option<Task>> {
        let key = format!("{}:{}", user_id, task_id.0);

        match self.task_db.get(key.as_bytes())? {
            Some(value) => {
                let task: Task =
                    serde_json::from_slice(&value).context("Failed to deserialize task")?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// List a user's tasks, oldest first, optionally filtered by status
    pub fn list_tasks_for_user(
        &self,
        user_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let prefix = format!("user:{user_id}:");
        let mut tasks = Vec::new();

        for item in self.index_db.prefix_iterator(prefix.as_bytes()) {
            let (key, _) = item.context("Failed to read task index")?;
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            let Some(id_str) = key_str.strip_prefix(&prefix) else {
                break;
            };
            let Ok(uuid) = uuid::Uuid::parse_str(id_str) else {
                continue;
            };

            if let Some(task) = self.get_task(user_id, &TaskId(uuid))? {
                if status.map_or(true, |s| task.status == s) {
                    tasks.push(task);
                }
            }
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    /// Read, change and store a task under the write lock
    ///
    /// Returns `None` when the task does not exist for this user.
    pub fn modify_task<F>(&self, user_id: &str, task_id: &TaskId, apply: F) -> Result<Option<Task>>
    where
        F: FnOnce(&mut Task),
    {
        let _guard = self.write_lock.lock();
        let Some(mut task) = self.get_task(user_id, task_id)? else {
            return Ok(None);
        };

        self.remove_task_indices(&task)?;
        apply(&mut task);
        self.store_task(&task)?;

        Ok(Some(task))
    }

    /// Delete a task
    pub fn delete_task(&self, user_id: &str, task_id: &TaskId) -> Result<bool> {
        let key = format!("{}:{}", user_id, task_id.0);

        if let Some(task) = self.get_task(user_id, task_id)? {
            self.remove_task_indices(&task)?;
            self.task_db.delete(key.as_bytes())?;
            tracing::debug!(task_id = %task_id, "Deleted task");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Mark a task completed and commit it
    ///
    /// Completing an already completed task is a no-op reported through
    /// [`Completion::newly_completed`].
    pub fn complete_task(
        &self,
        user_id: &str,
        task_id: &TaskId,
        at: DateTime<Utc>,
    ) -> Result<Option<Completion>> {
        let _guard = self.write_lock.lock();
        let Some(mut task) = self.get_task(user_id, task_id)? else {
            return Ok(None);
        };

        if task.is_completed() {
            return Ok(Some(Completion {
                task,
                newly_completed: false,
            }));
        }

        self.remove_task_indices(&task)?;
        task.complete(at);
        self.store_task(&task)?;

        Ok(Some(Completion {
            task,
            newly_completed: true,
        }))
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// All pending tasks (any user) with `due_date` in `(from, to]`, earliest first
    pub fn pending_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Task>> {
        if to <= from {
            return Ok(Vec::new());
        }

        let start = due_bound(&from);
        // Exclusive: the first key of the second after `to`
        let end = due_bound(&(to + chrono::Duration::seconds(1)));

        let mut tasks = Vec::new();
        let iter = self
            .index_db
            .iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, _) = item.context("Failed to read due index")?;
            if key.as_ref() >= end.as_bytes() {
                break;
            }
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };

            // due:{ts}:{user_id}:{task_id}
            let mut parts = key_str.splitn(4, ':');
            let (Some("due"), Some(_ts), Some(user_id), Some(id_str)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let Ok(uuid) = uuid::Uuid::parse_str(id_str) else {
                continue;
            };

            if let Some(task) = self.get_task(user_id, &TaskId(uuid))? {
                if task.is_due_between(from, to) {
                    tasks.push(task);
                }
            }
        }

        Ok(tasks)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        self.task_db.flush().context("Failed to flush tasks DB")?;
        self.index_db.flush().context("Failed to flush tasks index DB")?;
        Ok(())
    }
}

//! Task Handlers
//!
//! User-scoped CRUD over the task store plus the completion operation that
//! feeds the event flow. Internal endpoints serve the consumers through
//! service invocation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::router::AppState;
use super::state::ServiceState;
use crate::auth::AuthUser;
use crate::errors::{AppError, ValidationErrorExt};
use crate::tasks::{RecurrencePattern, Task, TaskId, TaskPriority, TaskStatus, TaskStore};
use crate::validation;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Request to create a task
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_recurring: bool,
    /// daily | weekly | monthly; anything else reads as daily
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
    pub is_recurring: Option<bool>,
    pub recurrence_pattern: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CompleteTaskResponse {
    pub message: String,
    pub task: Task,
    /// Whether a `task.completed` event was accepted by the bus
    pub event_published: bool,
}

#[derive(Debug, Deserialize)]
pub struct DueTasksQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// =============================================================================
// HELPERS
// =============================================================================

fn task_store(state: &ServiceState) -> Result<&Arc<TaskStore>, AppError> {
    state
        .task_store()
        .ok_or_else(|| AppError::ServiceUnavailable("task store not hosted by this service".into()))
}

fn parse_task_id(task_id: &str) -> Result<TaskId, AppError> {
    validation::validate_task_id(task_id)
        .map(TaskId)
        .map_err(|e| AppError::InvalidTaskId(e.to_string()))
}

fn recurrence_from(is_recurring: bool, pattern: Option<&str>) -> RecurrencePattern {
    if !is_recurring {
        return RecurrencePattern::None;
    }
    match pattern.map(RecurrencePattern::from_str_loose) {
        Some(RecurrencePattern::None) | None => RecurrencePattern::Daily,
        Some(p) => p,
    }
}

/// Commit a completion, then publish it
///
/// Publishing happens only after the store has committed, and only for the
/// pending -> completed transition.
async fn complete_and_publish(
    state: &ServiceState,
    user_id: &str,
    task_id: &TaskId,
) -> Result<(Task, bool), AppError> {
    let store = task_store(state)?;
    let completion = store
        .complete_task(user_id, task_id, Utc::now())
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;

    if !completion.newly_completed {
        tracing::debug!(task_id = %task_id, "Task already completed, not republishing");
        return Ok((completion.task, false));
    }

    tracing::info!(task_id = %task_id, user_id = %user_id, "Task completed");

    let published = match state.publisher() {
        Some(publisher) => publisher.task_completed(&completion.task).await,
        None => false,
    };

    Ok((completion.task, published))
}

// =============================================================================
// USER-FACING HANDLERS
// =============================================================================

/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    validation::validate_title(&req.title).map_validation_err("title")?;
    if let Some(ref description) = req.description {
        validation::validate_description(description).map_validation_err("description")?;
    }
    validation::validate_tags(&req.tags).map_validation_err("tags")?;

    let pattern = recurrence_from(req.is_recurring, req.recurrence_pattern.as_deref());
    let mut task = Task::new(user_id, req.title.trim().to_string()).with_recurrence(pattern);
    task.description = req.description;
    task.priority = req.priority;
    task.tags = req.tags;
    task.due_date = req.due_date;

    task_store(&state)?
        .store_task(&task)
        .map_err(AppError::Internal)?;

    tracing::info!(task_id = %task.id, user_id = %task.user_id, recurring = task.is_recurring, "Task created");

    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, AppError> {
    let tasks = task_store(&state)?
        .list_tasks_for_user(&user_id, query.status)
        .map_err(AppError::Internal)?;

    Ok(Json(TaskListResponse {
        count: tasks.len(),
        tasks,
    }))
}

/// GET /api/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let id = parse_task_id(&task_id)?;
    let task = task_store(&state)?
        .get_task(&user_id, &id)
        .map_err(AppError::Internal)?
        .ok_or(AppError::TaskNotFound(task_id))?;

    Ok(Json(task))
}

/// PUT /api/tasks/{task_id}
///
/// Setting `status` to completed goes through the same path as
/// `PATCH .../complete`; setting it back to pending reopens the task.
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let id = parse_task_id(&task_id)?;
    let store = task_store(&state)?;

    if let Some(ref title) = req.title {
        validation::validate_title(title).map_validation_err("title")?;
    }
    if let Some(ref description) = req.description {
        validation::validate_description(description).map_validation_err("description")?;
    }
    if let Some(ref tags) = req.tags {
        validation::validate_tags(tags).map_validation_err("tags")?;
    }

    let complete_requested = req.status == Some(TaskStatus::Completed);
    let task = store
        .modify_task(&user_id, &id, |task| apply_update(task, req))
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::TaskNotFound(task_id.clone()))?;

    if complete_requested && !task.is_completed() {
        let (task, _) = complete_and_publish(&state, &user_id, &id).await?;
        return Ok(Json(task));
    }

    Ok(Json(task))
}

/// Apply a validated partial update; completion is left to the caller
fn apply_update(task: &mut Task, req: UpdateTaskRequest) {
    if let Some(title) = req.title {
        task.title = title.trim().to_string();
    }
    if let Some(description) = req.description {
        task.description = Some(description);
    }
    if let Some(tags) = req.tags {
        task.tags = tags;
    }
    if let Some(priority) = req.priority {
        task.priority = priority;
    }
    if let Some(due_date) = req.due_date {
        task.due_date = Some(due_date);
    }
    if req.is_recurring.is_some() || req.recurrence_pattern.is_some() {
        let recurring = req.is_recurring.unwrap_or(task.is_recurring);
        let pattern = req
            .recurrence_pattern
            .as_deref()
            .unwrap_or(task.recurrence_pattern.as_str());
        let updated = recurrence_from(recurring, Some(pattern));
        task.is_recurring = updated != RecurrencePattern::None;
        task.recurrence_pattern = updated;
    }
    if req.status == Some(TaskStatus::Pending) && task.is_completed() {
        task.status = TaskStatus::Pending;
        task.completed_at = None;
    }
    task.updated_at = Utc::now();
}

/// DELETE /api/tasks/{task_id}
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_task_id(&task_id)?;
    let deleted = task_store(&state)?
        .delete_task(&user_id, &id)
        .map_err(AppError::Internal)?;

    if !deleted {
        return Err(AppError::TaskNotFound(task_id));
    }

    Ok(Json(serde_json::json!({
        "message": "Task deleted successfully"
    })))
}

/// PATCH /api/tasks/{task_id}/complete
pub async fn complete_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<CompleteTaskResponse>, AppError> {
    let id = parse_task_id(&task_id)?;
    let (task, event_published) = complete_and_publish(&state, &user_id, &id).await?;

    Ok(Json(CompleteTaskResponse {
        message: "Task marked as completed".to_string(),
        task,
        event_published,
    }))
}

// =============================================================================
// INTERNAL (SERVICE INVOCATION)
// =============================================================================

/// POST /internal/tasks - insert a task generated by a consumer
pub async fn insert_internal(
    State(state): State<AppState>,
    Json(task): Json<Task>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validation::validate_user_id(&task.user_id).map_validation_err("user_id")?;
    validation::validate_title(&task.title).map_validation_err("title")?;

    task_store(&state)?
        .store_task(&task)
        .map_err(AppError::Internal)?;

    tracing::info!(task_id = %task.id, user_id = %task.user_id, "Inserted task via service invocation");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": task.id })),
    ))
}

/// GET /internal/tasks/due?from=..&to=.. - pending tasks due in `(from, to]`
pub async fn due_internal(
    State(state): State<AppState>,
    Query(query): Query<DueTasksQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tasks = task_store(&state)?
        .pending_due_between(query.from, query.to)
        .map_err(AppError::Internal)?;

    Ok(Json(serde_json::json!({
        "count": tasks.len(),
        "tasks": tasks
    })))
}

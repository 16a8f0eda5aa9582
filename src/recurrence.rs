//! Recurrence engine
//!
//! Consumes `task.completed`. For a recurring task it inserts the next
//! instance, due one fixed offset after the completion. The successor is
//! gated by a `recurrence_generated` marker so a redelivered event does not
//! produce a second task.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::events::TaskCompletedEvent;
use crate::markers::{Claim, IdempotencyGate, MarkerKey, MarkerKind, NotificationMarker};
use crate::metrics::{DUPLICATES_SKIPPED_TOTAL, EVENTS_RECEIVED_TOTAL, RECURRING_TASKS_CREATED_TOTAL};
use crate::tasks::{RecurrencePattern, Task, TaskId, TaskPriority, TaskRepository, TaskStatus};

const CONSUMER: &str = "recurrence";

/// What handling one delivery did
#[derive(Debug, Clone, PartialEq)]
pub enum RecurrenceOutcome {
    /// Not a recurring task
    Ignored,
    /// Successor inserted
    Created {
        task_id: TaskId,
        next_due: DateTime<Utc>,
    },
    /// A successor for this completion already exists
    Duplicate,
}

impl RecurrenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceOutcome::Ignored => "ignored",
            RecurrenceOutcome::Created { .. } => "created",
            RecurrenceOutcome::Duplicate => "duplicate",
        }
    }
}

pub struct RecurrenceEngine {
    repo: Arc<dyn TaskRepository>,
    gate: IdempotencyGate,
}

impl RecurrenceEngine {
    pub fn new(repo: Arc<dyn TaskRepository>, gate: IdempotencyGate) -> Self {
        Self { repo, gate }
    }

    /// Handle one `task.completed` delivery
    ///
    /// An `Err` means nothing was created and the delivery should be retried.
    pub async fn handle(
        &self,
        event: &TaskCompletedEvent,
        now: DateTime<Utc>,
    ) -> Result<RecurrenceOutcome> {
        let outcome = self.process(event, now).await;

        let label = match &outcome {
            Ok(o) => o.as_str(),
            Err(_) => "error",
        };
        EVENTS_RECEIVED_TOTAL.with_label_values(&[CONSUMER, label]).inc();

        outcome
    }

    async fn process(
        &self,
        event: &TaskCompletedEvent,
        now: DateTime<Utc>,
    ) -> Result<RecurrenceOutcome> {
        if !event.is_recurring {
            tracing::debug!(task_id = %event.id, "Not recurring, ignored");
            return Ok(RecurrenceOutcome::Ignored);
        }

        let key = MarkerKey::successor(&event.user_id, &event.id, event.completed_at, now);
        let marker = NotificationMarker::new(
            &event.id,
            &event.user_id,
            MarkerKind::RecurrenceGenerated,
            now,
        );

        match self
            .gate
            .claim(&key, &marker)
            .await
            .with_context(|| format!("Failed to claim successor marker {key}"))?
        {
            Claim::Acquired => {}
            Claim::AlreadyClaimed => {
                DUPLICATES_SKIPPED_TOTAL.with_label_values(&[CONSUMER]).inc();
                tracing::info!(
                    task_id = %event.id,
                    user_id = %event.user_id,
                    "Successor already generated for this completion, skipping"
                );
                return Ok(RecurrenceOutcome::Duplicate);
            }
        }

        let successor = successor_for(event, now);
        let next_due = successor.due_date.unwrap_or(now);

        if let Err(e) = self.repo.insert_task(&successor).await {
            tracing::error!(
                task_id = %event.id,
                user_id = %event.user_id,
                "Failed to insert successor task: {:#}",
                e
            );
            if let Err(release_err) = self.gate.release(&key).await {
                tracing::warn!(key = %key, "Failed to release successor marker: {}", release_err);
            }
            return Err(e.context("Failed to insert successor task"));
        }

        RECURRING_TASKS_CREATED_TOTAL.inc();
        tracing::info!(
            predecessor = %event.id,
            task_id = %successor.id,
            user_id = %successor.user_id,
            pattern = %successor.recurrence_pattern,
            next_due = %next_due.to_rfc3339(),
            "Created next instance of recurring task"
        );

        Ok(RecurrenceOutcome::Created {
            task_id: successor.id,
            next_due,
        })
    }
}

/// Build the next instance of a recurring task
///
/// A recurring event without a usable pattern behaves as daily.
pub fn successor_for(event: &TaskCompletedEvent, now: DateTime<Utc>) -> Task {
    let pattern = match event.recurrence_pattern {
        RecurrencePattern::None => RecurrencePattern::Daily,
        p => p,
    };
    let next_due = pattern.next_due(event.completed_at_or(now));

    let mut task = Task::new(event.user_id.clone(), event.title.clone()).with_recurrence(pattern);
    task.description = Some(format!("Auto-generated task based on {pattern} pattern."));
    task.status = TaskStatus::Pending;
    task.priority = TaskPriority::Medium;
    task.due_date = Some(next_due);
    task
}

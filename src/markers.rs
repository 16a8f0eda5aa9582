//! Idempotency markers
//!
//! A marker asserts "this action has already been taken". Claiming one is an
//! atomic create-if-absent against the state store, so exactly one of any
//! number of concurrent deliveries of the same event wins the claim. Markers
//! are never deleted on the happy path; a claim is only released when the
//! action it guards failed and should be retried.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{NOTIFICATION_MARKER_PREFIX, RECURRENCE_MARKER_PREFIX};
use crate::sidecar::{SidecarError, StateStore};

/// What a marker de-duplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Notification for a completed recurring task
    RecurringCompletion,
    /// Reminder sent by the due-date sweep
    DueDateReminder,
    /// Successor task generated by the recurrence engine
    RecurrenceGenerated,
}

impl MarkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::RecurringCompletion => "recurring_completion",
            MarkerKind::DueDateReminder => "due_date_reminder",
            MarkerKind::RecurrenceGenerated => "recurrence_generated",
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored under a marker key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMarker {
    pub task_id: String,
    pub user_id: String,
    pub sent_at: DateTime<Utc>,
    pub notification_type: MarkerKind,
}

impl NotificationMarker {
    pub fn new(task_id: &str, user_id: &str, kind: MarkerKind, at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            sent_at: at,
            notification_type: kind,
        }
    }
}

/// State-store key of a marker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey(String);

impl MarkerKey {
    /// `notification:{user}:{task}:{YYYY-MM-DD}:{kind}`
    ///
    /// One per (user, task, calendar day, kind).
    pub fn daily(user_id: &str, task_id: &str, day: NaiveDate, kind: MarkerKind) -> Self {
        Self(format!(
            "{}:{}:{}:{}:{}",
            NOTIFICATION_MARKER_PREFIX,
            user_id,
            task_id,
            day.format("%Y-%m-%d"),
            kind
        ))
    }

    /// `recurrence:{user}:{task}:{completion}`
    ///
    /// Keyed on the completion timestamp when the event carries one, so a
    /// task completed again later gets a fresh successor. Falls back to the
    /// processing day otherwise.
    pub fn successor(
        user_id: &str,
        task_id: &str,
        completed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let instant = match completed_at {
            Some(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
            None => now.date_naive().format("%Y-%m-%d").to_string(),
        };
        Self(format!(
            "{}:{}:{}:{}",
            RECURRENCE_MARKER_PREFIX, user_id, task_id, instant
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the action
    Acquired,
    /// Someone already took it; skip
    AlreadyClaimed,
}

/// Gate in front of every externally visible side effect of the consumers
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn StateStore>,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Atomically claim `key`, storing `marker` as its value
    pub async fn claim(
        &self,
        key: &MarkerKey,
        marker: &NotificationMarker,
    ) -> Result<Claim, SidecarError> {
        let value = serde_json::to_value(marker).map_err(|source| SidecarError::Decode {
            operation: "marker_encode",
            source,
        })?;

        if self.store.create_if_absent(key.as_str(), &value).await? {
            tracing::debug!(key = %key, kind = %marker.notification_type, "Marker claimed");
            Ok(Claim::Acquired)
        } else {
            tracing::debug!(key = %key, "Marker already present");
            Ok(Claim::AlreadyClaimed)
        }
    }

    /// Drop a claim whose guarded action failed
    pub async fn release(&self, key: &MarkerKey) -> Result<(), SidecarError> {
        self.store.delete(key.as_str()).await?;
        tracing::debug!(key = %key, "Marker released");
        Ok(())
    }

    pub async fn lookup(&self, key: &MarkerKey) -> Result<Option<NotificationMarker>, SidecarError> {
        match self.store.get(key.as_str()).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| SidecarError::Decode {
                    operation: "marker_decode",
                    source,
                }),
            None => Ok(None),
        }
    }
}

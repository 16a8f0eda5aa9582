//! `task.completed` wire event
//!
//! [`TaskCompletedEvent`] is the canonical in-process form. Everything that
//! arrives from the bus passes through [`TaskCompletedEvent::from_payload`],
//! which is the single place where envelope unwrapping, casing aliases and
//! lenient defaults are applied. Consumers only ever read canonical fields.

pub mod publisher;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tasks::{RecurrencePattern, Task};

pub use publisher::CompletionPublisher;

/// Payload published when a task transitions to completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletedEvent {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub is_recurring: bool,
    pub recurrence_pattern: RecurrencePattern,
    /// Absent when the producer sent no parsable timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

/// Why an inbound payload was rejected
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(String),

    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),
}

/// camelCase spellings accepted on the wire, mapped to their canonical names
const FIELD_ALIASES: [(&str, &str); 4] = [
    ("userId", "user_id"),
    ("isRecurring", "is_recurring"),
    ("recurrencePattern", "recurrence_pattern"),
    ("completedAt", "completed_at"),
];

/// Canonical field names, after alias folding
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    is_recurring: Option<bool>,
    #[serde(default)]
    recurrence_pattern: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

/// Fold alias keys onto canonical ones; a present canonical key wins
fn canonicalize(mut map: Map<String, Value>) -> Map<String, Value> {
    for (alias, canonical) in FIELD_ALIASES {
        if let Some(value) = map.remove(alias) {
            let canonical_missing = map.get(canonical).map_or(true, Value::is_null);
            if canonical_missing {
                map.insert(canonical.to_string(), value);
            }
        }
    }
    map
}

impl TaskCompletedEvent {
    /// Event for a task that has just been committed as completed
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            is_recurring: task.is_recurring,
            recurrence_pattern: if task.is_recurring {
                task.recurrence_pattern
            } else {
                RecurrencePattern::None
            },
            completed_at: task.completed_at,
        }
    }

    /// Normalize a delivered payload into the canonical event
    ///
    /// - a CloudEvent envelope (`specversion` + `data`) is unwrapped
    /// - camelCase field names are accepted
    /// - missing/unknown `recurrence_pattern` reads as daily
    /// - `completed_at` may be RFC 3339 or naive ISO-8601 (UTC); unparsable is dropped
    /// - `id` and `user_id` are required
    pub fn from_payload(payload: Value) -> Result<Self, EventError> {
        let body = canonicalize(unwrap_envelope(payload)?);

        let wire: WireEvent = serde_json::from_value(Value::Object(body))
            .map_err(|e| EventError::Malformed(e.to_string()))?;

        let id = match wire.id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(EventError::MissingField("id")),
        };

        let user_id = wire
            .user_id
            .filter(|u| !u.trim().is_empty())
            .ok_or(EventError::MissingField("user_id"))?;

        let completed_at = wire.completed_at.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                tracing::warn!(task_id = %id, completed_at = raw, "Unparsable completed_at, using processing time");
            }
            parsed
        });

        Ok(Self {
            id,
            user_id,
            title: wire.title.unwrap_or_default(),
            is_recurring: wire.is_recurring.unwrap_or(false),
            recurrence_pattern: wire
                .recurrence_pattern
                .as_deref()
                .map(RecurrencePattern::from_str_loose)
                .unwrap_or_default(),
            completed_at,
        })
    }

    /// `completed_at`, or `now` when the producer did not supply one
    pub fn completed_at_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.completed_at.unwrap_or(now)
    }
}

fn unwrap_envelope(payload: Value) -> Result<Map<String, Value>, EventError> {
    let Value::Object(mut map) = payload else {
        return Err(EventError::Malformed("payload is not a JSON object".to_string()));
    };

    if !map.contains_key("specversion") {
        return Ok(map);
    }

    let data = match map.remove("data") {
        Some(Value::String(raw)) => {
            serde_json::from_str(&raw).map_err(|e| EventError::Malformed(e.to_string()))?
        }
        Some(data) => data,
        None => return Err(EventError::Malformed("envelope has no data".to_string())),
    };

    match data {
        Value::Object(inner) => Ok(inner),
        _ => Err(EventError::Malformed("envelope data is not an object".to_string())),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

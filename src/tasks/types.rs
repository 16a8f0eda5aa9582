//! Task domain types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::constants::{DAILY_OFFSET_DAYS, MONTHLY_OFFSET_DAYS, WEEKLY_OFFSET_DAYS};

/// Unique identifier for tasks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

/// Named cadence of a recurring task
///
/// Serialized as a lowercase string. Unknown or missing values read as `Daily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    #[default]
    Daily,
    Weekly,
    Monthly,
    None,
}

impl RecurrencePattern {
    /// Parse leniently: case-insensitive, anything unrecognized is `Daily`
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "daily" => RecurrencePattern::Daily,
            "weekly" => RecurrencePattern::Weekly,
            "monthly" => RecurrencePattern::Monthly,
            "none" => RecurrencePattern::None,
            _ => RecurrencePattern::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::None => "none",
        }
    }

    /// Fixed offset to the next instance
    ///
    /// `None` has no cadence of its own and falls back to the daily offset.
    pub fn offset(&self) -> Duration {
        match self {
            RecurrencePattern::Daily | RecurrencePattern::None => Duration::days(DAILY_OFFSET_DAYS),
            RecurrencePattern::Weekly => Duration::days(WEEKLY_OFFSET_DAYS),
            RecurrencePattern::Monthly => Duration::days(MONTHLY_OFFSET_DAYS),
        }
    }

    /// Due date of the next instance
    pub fn next_due(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + self.offset()
    }
}

impl<'de> Deserialize<'de> for RecurrencePattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(RecurrencePattern::from_str_loose)
            .unwrap_or_default())
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-scoped task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_recurring: bool,
    /// `None` for non-recurring tasks
    #[serde(default = "pattern_none")]
    pub recurrence_pattern: RecurrencePattern,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn pattern_none() -> RecurrencePattern {
    RecurrencePattern::None
}

impl Task {
    /// Create a new pending, non-recurring task
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            user_id,
            title,
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            tags: Vec::new(),
            due_date: None,
            is_recurring: false,
            recurrence_pattern: RecurrencePattern::None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Make this task recur with the given pattern
    pub fn with_recurrence(mut self, pattern: RecurrencePattern) -> Self {
        self.is_recurring = pattern != RecurrencePattern::None;
        self.recurrence_pattern = pattern;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Mark as completed at `at`
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Pending and due in `(from, to]`
    pub fn is_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.due_date.map(|due| due > from && due <= to).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_offsets() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            RecurrencePattern::Daily.next_due(from),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            RecurrencePattern::Weekly.next_due(from),
            Utc.with_ymd_and_hms(2024, 2, 7, 0, 0, 0).unwrap()
        );
        // 30 days, not "same day next month"
        assert_eq!(
            RecurrencePattern::Monthly.next_due(from),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(RecurrencePattern::None.offset(), Duration::days(1));
    }

    #[test]
    fn test_loose_parsing() {
        assert_eq!(RecurrencePattern::from_str_loose("WEEKLY"), RecurrencePattern::Weekly);
        assert_eq!(RecurrencePattern::from_str_loose(" monthly "), RecurrencePattern::Monthly);
        assert_eq!(RecurrencePattern::from_str_loose("yearly"), RecurrencePattern::Daily);
        assert_eq!(RecurrencePattern::from_str_loose(""), RecurrencePattern::Daily);
    }

    #[test]
    fn test_pattern_deserialize_null_and_unknown() {
        let p: RecurrencePattern = serde_json::from_str("null").unwrap();
        assert_eq!(p, RecurrencePattern::Daily);
        let p: RecurrencePattern = serde_json::from_str("\"fortnightly\"").unwrap();
        assert_eq!(p, RecurrencePattern::Daily);
        assert_eq!(serde_json::to_string(&RecurrencePattern::Weekly).unwrap(), "\"weekly\"");
    }

    #[test]
    fn test_due_window_is_half_open() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut task = Task::new("u1".into(), "t".into());

        task.due_date = Some(now);
        assert!(!task.is_due_between(now, now + Duration::hours(24)));

        task.due_date = Some(now + Duration::hours(24));
        assert!(task.is_due_between(now, now + Duration::hours(24)));

        task.complete(now);
        assert!(!task.is_due_between(now, now + Duration::hours(24)));
    }
}

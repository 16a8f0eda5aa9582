//! Documented constants for the task event flow
//!
//! Names of bus/store components, recurrence offsets and reminder tuning live
//! here so the consumers and the publisher agree on them.

// =============================================================================
// BUS / STATE STORE COMPONENTS
// =============================================================================

/// Pub/sub component the consumers subscribe through
pub const DEFAULT_PUBSUB_NAME: &str = "pubsub";

/// Topic carrying [`crate::events::TaskCompletedEvent`] payloads
pub const TASK_COMPLETED_TOPIC: &str = "task.completed";

/// State store component holding idempotency markers
pub const DEFAULT_STATE_STORE: &str = "statestore";

/// App id of the API service, target of service invocation from the consumers
pub const DEFAULT_TASKS_APP_ID: &str = "backend";

/// Default sidecar HTTP port when neither a URL nor `DAPR_HTTP_PORT` is set
pub const DEFAULT_SIDECAR_HTTP_PORT: u16 = 3500;

/// Route the bus POSTs `task.completed` deliveries to
pub const TASK_COMPLETED_ROUTE: &str = "/events/task-completed";

// =============================================================================
// RECURRENCE
// =============================================================================

/// Offsets are fixed day counts. Calendar-month arithmetic is not used.
pub const DAILY_OFFSET_DAYS: i64 = 1;
pub const WEEKLY_OFFSET_DAYS: i64 = 7;
pub const MONTHLY_OFFSET_DAYS: i64 = 30;

// =============================================================================
// REMINDERS
// =============================================================================

/// Reminder sweep look-ahead: tasks due in `(now, now + window]` are reminded
pub const DEFAULT_REMINDER_WINDOW_HOURS: i64 = 24;

/// Prefix added to reminders for high priority tasks
pub const URGENT_PREFIX: &str = "URGENT: ";

// =============================================================================
// MARKER KEYS
// =============================================================================

/// Key prefix for per-day notification markers
pub const NOTIFICATION_MARKER_PREFIX: &str = "notification";

/// Key prefix for successor-generation markers
pub const RECURRENCE_MARKER_PREFIX: &str = "recurrence";

/// Capacity of in-process broadcast channels (local bus, notification stream)
pub const BROADCAST_CAPACITY: usize = 1024;

// =============================================================================
// SHUTDOWN
// =============================================================================

/// Upper bound on the whole cleanup after the server stops accepting requests
pub const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Upper bound on flushing the task store
pub const DATABASE_FLUSH_TIMEOUT_SECS: u64 = 10;

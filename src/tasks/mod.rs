//! Tasks: domain types, the durable task store and the consumer-facing repository seam

pub mod repository;
pub mod store;
pub mod types;

pub use repository::TaskRepository;
pub use store::{Completion, TaskStore};
pub use types::{RecurrencePattern, Task, TaskId, TaskPriority, TaskStatus};

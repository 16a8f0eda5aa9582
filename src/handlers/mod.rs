//! HTTP API Handlers
//!
//! Each submodule handles one surface of the service.

// Core modules
pub mod router;
pub mod state;

// Health and infrastructure
pub mod health;

// Event delivery from the bus
pub mod pubsub;

// Reminder trigger and notification stream
pub mod reminders;

// Task API (collaborator surface)
pub mod tasks;

// Test utilities (compiled only in test builds)
#[cfg(test)]
pub mod test_helpers;


// Re-export commonly used items
pub use pubsub::{dispatch, run_local_dispatcher, Ack, Delivery};
pub use router::{build_protected_routes, build_public_routes, build_router, AppState};
pub use state::{Components, ServiceState};

//! Notification Orchestrator (C6): creates notifications and enqueues them.

pub mod error;
pub mod fake;
pub mod service;
pub mod store;

pub use error::{OrchestratorError, OrchestratorResult};
pub use fake::InMemoryNotificationStore;
pub use service::{
    BatchFailure, BatchOutcome, BatchRecipient, BatchRequest, NotificationOrchestrator,
    NotificationRequest, TemplatedBatchRecipient, TemplatedBatchRequest,
};
pub use store::{NotificationFilter, NotificationStats, NotificationStore, PostgresNotificationStore};

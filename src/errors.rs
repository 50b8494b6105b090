//! # Pipeline Error Taxonomy
//!
//! Unified error type for the notification pipeline (spec §7). Each variant
//! is one of the named error kinds; component-local error enums
//! (`TemplateError`, `QueueError`, `LedgerError`) convert into this type at
//! the seams.

use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Top-level error kind shared across all components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller supplied bad data; surfaced to the caller.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Notification, queue item, delivery attempt, or template not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Worker exists, or an item was already claimed. Surfaced to admin
    /// callers; silently skipped inside worker loops (§7).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transport failure that should drive a retry with backoff.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// Transport failure that is terminal regardless of remaining attempts.
    #[error("permanent transport error: {0}")]
    PermanentTransport(String),

    /// Persistent-store (Postgres) error.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Priority-index (Redis) error. Non-fatal by design; logged by callers
    /// rather than propagated through the primary path (§4.4/§7).
    #[error("priority index error: {0}")]
    Index(#[from] redis::RedisError),
}

impl PipelineError {
    /// `true` for errors that should drive a retry (with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientTransport(_))
    }

    /// `true` for errors that must terminate the queue item regardless of
    /// remaining attempts (§6 Transport port contract).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineError::PermanentTransport(_))
    }

    /// `true` for errors that are logged but must not fail the primary path
    /// (priority-index writes/pops, per §4.4).
    pub fn is_index_error(&self) -> bool {
        matches!(self, PipelineError::Index(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_permanent_is_not() {
        assert!(PipelineError::TransientTransport("timeout".into()).is_retryable());
        assert!(!PipelineError::PermanentTransport("bad address".into()).is_retryable());
    }

    #[test]
    fn permanent_is_terminal() {
        assert!(PipelineError::PermanentTransport("rejected".into()).is_terminal());
        assert!(!PipelineError::TransientTransport("timeout".into()).is_terminal());
    }
}

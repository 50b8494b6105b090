//! # Transport Port (C5 external collaborator)
//!
//! Consumed by the worker loop (spec §4.5/§6). The SMTP transport itself is
//! out of scope; only this narrow contract is specified. `mockall::automock`
//! gives worker-loop tests a deterministic double, the way the other example
//! repos mock their queue/transport boundaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::DeliveryStatus;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Drives a retry with backoff.
    #[error("transient transport error: {0}")]
    Transient(String),
    /// Terminal regardless of remaining attempts.
    #[error("permanent transport error: {0}")]
    Permanent(String),
}

/// A point-in-time status update from the provider, used for webhook
/// reconciliation via `Transport::status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatusUpdate {
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Send(ctx, to, subject, body, is_html) → (message_id, error)`.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<String, TransportError>;

    /// `Validate(email) → error` — syntactic/structural check.
    fn validate(&self, email: &str) -> Result<(), TransportError>;

    /// `Status(message_id) → {sent|delivered|failed|bounced, timestamp}`.
    /// Optional: providers that don't support webhook reconciliation report
    /// `Ok(None)`.
    async fn status(&self, _message_id: &str) -> Result<Option<ProviderStatusUpdate>, TransportError> {
        Ok(None)
    }
}

//! Error kind for the queue store (spec §4.3).

use thiserror::Error;

use crate::errors::PipelineError;

pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue item not found: {0}")]
    NotFound(i64),

    /// Claim lost, or an operation attempted on a terminal item.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => PipelineError::NotFound(format!("queue item {id}")),
            QueueError::Conflict(msg) => PipelineError::Conflict(msg),
            QueueError::InvalidRequest(msg) => PipelineError::InvalidRequest(msg),
            QueueError::Storage(e) => PipelineError::Storage(e),
        }
    }
}

/// `backoff(n) = min(base * 2^(n-1), cap)` (spec §4.3).
pub fn backoff_seconds(attempts: i32, base_seconds: u64, cap_seconds: u64) -> u64 {
    if attempts <= 0 {
        return 0;
    }
    let exponent = (attempts - 1).min(62) as u32;
    let scaled = base_seconds.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
    scaled.min(cap_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_until_cap() {
        assert_eq!(backoff_seconds(1, 60, 3600), 60);
        assert_eq!(backoff_seconds(2, 60, 3600), 120);
        assert_eq!(backoff_seconds(3, 60, 3600), 240);
        assert_eq!(backoff_seconds(7, 60, 3600), 3600);
    }

    #[test]
    fn backoff_does_not_overflow_for_large_attempts() {
        assert_eq!(backoff_seconds(1000, 60, 3600), 3600);
    }
}

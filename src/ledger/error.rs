//! Error kind for the delivery ledger (spec §4.2).

use thiserror::Error;

use crate::errors::PipelineError;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("delivery attempt not found: {0}")]
    NotFound(i64),

    #[error("invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => PipelineError::NotFound(format!("delivery attempt {id}")),
            LedgerError::InvalidStatus(msg) | LedgerError::InvalidRequest(msg) => {
                PipelineError::InvalidRequest(msg)
            }
            LedgerError::Storage(e) => PipelineError::Storage(e),
        }
    }
}

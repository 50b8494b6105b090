//! Error kind for the notification store and orchestrator (spec §4.6).

use thiserror::Error;

use crate::errors::PipelineError;
use crate::ledger::LedgerError;
use crate::queue::QueueError;
use crate::template::TemplateError;

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("notification not found: {0}")]
    NotFound(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<OrchestratorError> for PipelineError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(id) => PipelineError::NotFound(format!("notification {id}")),
            OrchestratorError::InvalidRequest(msg) => PipelineError::InvalidRequest(msg),
            OrchestratorError::Queue(e) => e.into(),
            OrchestratorError::Ledger(e) => e.into(),
            OrchestratorError::Template(e) => e.into(),
            OrchestratorError::Storage(e) => PipelineError::Storage(e),
        }
    }
}

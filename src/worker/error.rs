//! Error kind for the worker pool (spec §4.5).

use thiserror::Error;

use crate::errors::PipelineError;

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker '{0}' already exists")]
    Exists(String),

    #[error("worker '{0}' not found")]
    NotFound(String),
}

impl From<WorkerError> for PipelineError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Exists(id) => PipelineError::Conflict(format!("worker '{id}' already exists")),
            WorkerError::NotFound(id) => PipelineError::NotFound(format!("worker '{id}'")),
        }
    }
}

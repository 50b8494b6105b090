//! Error kind for the template engine (spec §4.1).

use thiserror::Error;

use crate::errors::PipelineError;

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template already exists: {0}")]
    Exists(String),

    #[error("invalid template: {0}")]
    Invalid(String),
}

impl From<TemplateError> for PipelineError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(msg) => PipelineError::NotFound(msg),
            TemplateError::Exists(msg) => PipelineError::Conflict(msg),
            TemplateError::Invalid(msg) => PipelineError::InvalidRequest(msg),
        }
    }
}

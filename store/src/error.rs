use forge_common::retry::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} is not in a state that allows this operation (current status: {1})")]
    WrongState(String, String),
    #[error("resume requires at least one pending work-item; job {0} has none")]
    NothingToResume(String),
    #[error("storage is busy, retry")]
    Busy,
    #[error("underlying repository error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("settings error: {0}")]
    Settings(#[from] forge_common::CommonError),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Busy)
    }
}

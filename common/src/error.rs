use thiserror::Error;

/// Errors shared by the settings cache and the retry helper.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("settings key {0:?} not found and no compiled-in default exists")]
    MissingSetting(String),
    #[error("settings value at {0:?} is not valid JSON for the requested type: {1}")]
    InvalidSetting(String, serde_json::Error),
    #[error("settings repository error: {0}")]
    Repository(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

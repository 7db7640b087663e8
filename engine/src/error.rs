//! Errors raised by the engine lifecycle manager and its runner backends.
//! Kept separate from `forge_store::DispatchError` — this crate's errors
//! cover lifecycle management (start/stop/port allocation); the store's
//! cover the narrower "did a generate request succeed" question the
//! worker actually needs, and are produced by translating these at the
//! `EngineDispatch` boundary.

use thiserror::Error;

use forge_common::EngineVariantId;

use crate::variant::EngineKind;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no default variant is set for {0:?}")]
    NoDefaultVariant(EngineKind),
    #[error("engine variant {0} is not registered")]
    VariantNotFound(EngineVariantId),
    #[error("engine variant {0} is disabled")]
    VariantDisabled(EngineVariantId),
    #[error("{0} is the only synthesis variant and cannot be disabled")]
    CannotDisableDefaultTts(EngineVariantId),
    #[error("no free port available in the configured range")]
    PortExhausted,
    #[error("engine variant {0} is not running")]
    NotRunning(EngineVariantId),
    #[error("failed to start engine variant {0}: {1}")]
    Spawn(EngineVariantId, String),
    #[error("docker error: {0}")]
    Docker(String),
    #[error("http error talking to engine: {0}")]
    Http(#[from] reqwest::Error),
    #[error("settings error: {0}")]
    Settings(#[from] forge_common::CommonError),
}

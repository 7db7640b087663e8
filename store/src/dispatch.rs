//! The seam between job processing and the engine subsystem. forge-store
//! owns this trait (it's the consumer) and forge-engine implements it —
//! keeps the dependency edge pointing one way and store's tests able to
//! run against a fake without pulling in HTTP or Docker at all.
//!
//! Grounded on `engine/src/actors/runner.rs`'s `RunnerActor`, which plays
//! the same "hand a task to whatever backend is configured, get a typed
//! result or a classified error back" role for the teacher's fetch jobs.

use async_trait::async_trait;
use forge_common::EngineVariantId;
use thiserror::Error;

use crate::model::{JobKind, SegmentSnapshot};

#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub kind: JobKind,
    pub engine_variant_id: EngineVariantId,
    pub model: Option<String>,
    pub segment: SegmentSnapshot,
}

#[derive(Clone, Debug)]
pub enum GenerateOutcome {
    Synthesis {
        audio_path: String,
        duration_ms: u64,
    },
    Analysis {
        score: f32,
        issues: Vec<String>,
    },
}

/// Mirrors the HTTP retry/restart classification from spec.md's engine
/// manager section: a client error never retries, a loading response
/// retries without restarting the engine, a server error retries after a
/// restart, and a transport failure is treated like a server error.
#[derive(Clone, Debug, Error)]
pub enum DispatchError {
    #[error("engine rejected the request: {0}")]
    ClientError(String),
    #[error("engine is still loading the model")]
    Loading,
    #[error("engine returned a server error: {0}")]
    ServerError(String),
    #[error("could not reach the engine: {0}")]
    Unreachable(String),
    #[error("no ready engine variant available for this job kind")]
    NoEngineAvailable,
    #[error("job was cancelled mid-dispatch")]
    Cancelled,
}

impl DispatchError {
    /// Whether the engine process itself should be restarted before the
    /// retry is attempted. Consulted by the `EngineDispatch` implementation's
    /// own retry loop (spec.md §4.4); a `DispatchError` reaching the worker
    /// has already exhausted that policy, so the worker never retries one.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            DispatchError::ServerError(_) | DispatchError::Unreachable(_)
        )
    }
}

#[async_trait]
pub trait EngineDispatch: Send + Sync {
    /// Ensure an engine variant suitable for `kind` (and `model`, if
    /// pinned) is running, starting one if necessary, then perform the
    /// generation. Implementations own the port registry, subprocess /
    /// Docker lifecycle, and HTTP retry policy.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateOutcome, DispatchError>;

    /// True if at least one variant capable of `kind` is installed,
    /// independent of whether it is currently running — used by the
    /// auto-chain policies to decide whether chaining is even possible
    /// (spec.md §4.7).
    async fn has_variant_for(&self, kind: JobKind) -> bool;
}

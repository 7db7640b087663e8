//! Runner backends: how an engine variant's process actually gets
//! started and stopped. `EngineManager` talks to whichever backend a
//! variant's [`crate::variant::RunnerKind`] names through this one trait,
//! the same way `forge-store` talks to engine dispatch through
//! [`forge_store::EngineDispatch`] — the manager never match on the
//! runner kind itself once the handle is picked.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::variant::EngineVariant;

pub mod local_docker;
pub mod local_process;
pub mod remote_docker;

/// What's needed to reach a started engine and later stop it again.
/// `process` is runner-specific (a child PID, a container id); the
/// manager only ever round-trips it back to `stop`.
#[derive(Debug)]
pub struct RunnerHandle {
    pub base_url: String,
    pub process: ProcessRef,
}

#[derive(Debug)]
pub enum ProcessRef {
    LocalProcess(u32),
    Container(String),
}

#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn start(&self, variant: &EngineVariant, port: u16) -> Result<RunnerHandle, EngineError>;
    async fn stop(&self, handle: &RunnerHandle) -> Result<(), EngineError>;
    /// True if the process/container backing `handle` is still alive,
    /// independent of whether the HTTP server inside it answers — used
    /// to tell "engine crashed" apart from "engine is still loading".
    async fn is_alive(&self, handle: &RunnerHandle) -> bool;
}

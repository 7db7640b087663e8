//! Engine variant registry, lifecycle manager, and runner backends
//! (subprocess / local Docker / remote Docker over SSH) behind a single
//! [`manager::EngineManager`] that implements `forge_store::EngineDispatch`.

pub use catalog::EngineRepository;
pub use error::EngineError;
pub use manager::EngineManager;
pub use port::PortRegistry;
pub use variant::{EngineCapabilities, EngineKind, EngineVariant, RunnerKind, VariantRegistry};

pub mod catalog;
mod dispatch_impl;
pub mod discovery;
mod error;
mod manager;
mod port;
pub mod retry;
pub mod runner;
mod variant;

pub fn version() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

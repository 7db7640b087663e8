//! Port for persisting the installed-variant catalog so `forged` can load
//! it back at startup instead of re-reading static config every boot.
//! `forge-repo` provides the SQLite-backed implementation; the dependency
//! points from this crate to the repository the same way
//! [`forge_store::EngineDispatch`] points from `forge-store` to us — the
//! consumer owns the trait.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::variant::EngineVariant;

#[async_trait]
pub trait EngineRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<EngineVariant>, EngineError>;
    async fn upsert(&self, variant: &EngineVariant) -> Result<(), EngineError>;
    async fn set_enabled(&self, id: &forge_common::EngineVariantId, enabled: bool) -> Result<(), EngineError>;
    async fn delete(&self, id: &forge_common::EngineVariantId) -> Result<(), EngineError>;
}

impl crate::variant::VariantRegistry {
    /// Load every persisted variant into this registry, registering each
    /// one and restoring the first-by-kind default ordering the rows were
    /// saved in. Called once at `forged` startup before any
    /// `EngineManager` method runs.
    pub async fn load_from(&self, repo: &dyn EngineRepository) -> Result<(), EngineError> {
        for variant in repo.load_all().await? {
            self.register(variant);
        }
        Ok(())
    }
}

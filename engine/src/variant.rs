//! Engine variant registry: what kinds of engine exist (TTS / STT /
//! quality-analysis), which runner backend each installed variant uses,
//! and what each one is capable of.
//!
//! Grounded on `sources/src/config.rs::Sources` (`BTreeMap<String, Site>`
//! loaded once and read by name throughout the process), generalized
//! from a static config file to a registry that also merges in rows a
//! `forge-repo`-backed catalog loaded from the database (SPEC_FULL §4.9).

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use forge_common::EngineVariantId;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineKind {
    Synthesis,
    Transcription,
    Analysis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunnerKind {
    LocalProcess,
    LocalDocker,
    RemoteDocker,
}

/// What an installed variant supports, read once at registration time and
/// consulted by [`crate::manager::EngineManager::ensure_ready`] to decide
/// between a hotswap and a stop/start cycle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    pub supports_model_hotswap: bool,
    pub supports_gpu: bool,
    /// Can serve `/models` without first loading a model — lets discovery
    /// use the shorter `engines.discoveryTimeoutSeconds` window instead of
    /// waiting for a full model load.
    pub supports_discovery_without_load: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineVariant {
    pub id: EngineVariantId,
    pub kind: EngineKind,
    pub runner: RunnerKind,
    /// Subprocess command (local_process) or image reference
    /// (local_docker / remote_docker), interpreted by the matching runner.
    pub target: String,
    pub default_model: Option<String>,
    pub capabilities: EngineCapabilities,
    pub enabled: bool,
}

/// All installed variants, keyed by id, plus the single default variant
/// per kind that `ensure_ready(kind, None)` resolves to.
#[derive(Default)]
pub struct VariantRegistry {
    variants: RwLock<BTreeMap<EngineVariantId, EngineVariant>>,
    defaults: RwLock<BTreeMap<EngineKind, EngineVariantId>>,
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, variant: EngineVariant) {
        let mut defaults = self.defaults.write();
        defaults.entry(variant.kind).or_insert_with(|| variant.id.clone());
        self.variants.write().insert(variant.id.clone(), variant);
    }

    pub fn get(&self, id: &EngineVariantId) -> Option<EngineVariant> {
        self.variants.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<EngineVariant> {
        self.variants.read().values().cloned().collect()
    }

    pub fn list_for_kind(&self, kind: EngineKind) -> Vec<EngineVariant> {
        self.variants.read().values().filter(|v| v.kind == kind).cloned().collect()
    }

    pub fn default_for(&self, kind: EngineKind) -> Option<EngineVariantId> {
        self.defaults.read().get(&kind).cloned()
    }

    pub fn set_default(&self, id: &EngineVariantId) -> Result<(), EngineError> {
        let kind = self
            .variants
            .read()
            .get(id)
            .map(|v| v.kind)
            .ok_or_else(|| EngineError::VariantNotFound(id.clone()))?;
        self.defaults.write().insert(kind, id.clone());
        Ok(())
    }

    /// Rejects disabling the last remaining synthesis variant, per the
    /// "cannot leave text-to-speech with zero variants" decision.
    pub fn set_enabled(&self, id: &EngineVariantId, enabled: bool) -> Result<(), EngineError> {
        let mut variants = self.variants.write();
        let variant = variants.get(id).ok_or_else(|| EngineError::VariantNotFound(id.clone()))?;
        if !enabled && variant.kind == EngineKind::Synthesis {
            let remaining_enabled = variants
                .values()
                .filter(|v| v.kind == EngineKind::Synthesis && v.enabled && &v.id != id)
                .count();
            if remaining_enabled == 0 {
                return Err(EngineError::CannotDisableDefaultTts(id.clone()));
            }
        }
        variants.get_mut(id).unwrap().enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, kind: EngineKind) -> EngineVariant {
        EngineVariant {
            id: EngineVariantId::new(id),
            kind,
            runner: RunnerKind::LocalProcess,
            target: "echo".to_owned(),
            default_model: None,
            capabilities: EngineCapabilities::default(),
            enabled: true,
        }
    }

    #[test]
    fn first_registered_variant_becomes_the_default() {
        let reg = VariantRegistry::new();
        reg.register(variant("xtts", EngineKind::Synthesis));
        reg.register(variant("piper", EngineKind::Synthesis));
        assert_eq!(reg.default_for(EngineKind::Synthesis), Some(EngineVariantId::new("xtts")));
    }

    #[test]
    fn cannot_disable_the_only_synthesis_variant() {
        let reg = VariantRegistry::new();
        reg.register(variant("xtts", EngineKind::Synthesis));
        let err = reg.set_enabled(&EngineVariantId::new("xtts"), false).unwrap_err();
        assert!(matches!(err, EngineError::CannotDisableDefaultTts(_)));
    }

    #[test]
    fn can_disable_a_synthesis_variant_when_another_remains_enabled() {
        let reg = VariantRegistry::new();
        reg.register(variant("xtts", EngineKind::Synthesis));
        reg.register(variant("piper", EngineKind::Synthesis));
        assert!(reg.set_enabled(&EngineVariantId::new("xtts"), false).is_ok());
    }

    #[test]
    fn disabling_a_non_synthesis_variant_is_always_allowed() {
        let reg = VariantRegistry::new();
        reg.register(variant("whisper", EngineKind::Transcription));
        assert!(reg.set_enabled(&EngineVariantId::new("whisper"), false).is_ok());
    }
}

//! Model catalog discovery: asking an installed-but-not-necessarily-
//! running variant what models it has available, and merging that
//! against whatever the database already recorded for it.
//!
//! Grounded on `sources/src/config.rs::Sources::load` (merge on-disk
//! config with compiled defaults, disk wins on conflict) and
//! `original_source/backend/core/base_engine_manager.py`'s
//! `_discover_engines` / `start_engine_for_discovery`, which starts an
//! engine without loading a model just to hit `/models`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use forge_common::EngineVariantId;

use crate::manager::EngineManager;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredModel {
    pub name: String,
    pub installed: bool,
}

/// Discover the models a variant currently reports, starting it in
/// discovery mode (no model preloaded) if it isn't already running.
/// Errors are swallowed to a warning and an empty list — discovery is a
/// best-effort catalog refresh, not something a caller should have to
/// handle failing (spec.md "non-fatal" framing for catalog refreshes).
pub async fn discover_models(manager: &EngineManager, variant_id: &EngineVariantId) -> Vec<DiscoveredModel> {
    match manager.discover_models(variant_id).await {
        Ok(models) => models
            .into_iter()
            .map(|name| DiscoveredModel { name, installed: true })
            .collect(),
        Err(e) => {
            warn!(variant = %variant_id, error = %e, "model discovery failed, returning empty catalog");
            Vec::new()
        }
    }
}

/// Merge a freshly discovered catalog with the previously known one: a
/// model already marked installed stays installed even if this round's
/// scan missed it (a transient engine hiccup shouldn't un-list a model),
/// but anything new the engine reports is added.
pub fn merge_catalog(known: &[DiscoveredModel], discovered: &[DiscoveredModel]) -> Vec<DiscoveredModel> {
    let mut merged = known.to_vec();
    for model in discovered {
        if let Some(existing) = merged.iter_mut().find(|m| m.name == model.name) {
            existing.installed = existing.installed || model.installed;
        } else {
            merged.push(model.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_previously_known_models_installed() {
        let known = vec![DiscoveredModel { name: "v1".into(), installed: true }];
        let discovered = vec![DiscoveredModel { name: "v2".into(), installed: true }];
        let merged = merge_catalog(&known, &discovered);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().find(|m| m.name == "v1").unwrap().installed);
    }
}

//! Read-through settings cache over a key/value repository, with dotted
//! navigation (`engines.inactivityTimeoutMinutes`) the way
//! `fetiche-sources::config::Sources` reads nested HCL config.
//!
//! Missing keys fall back to a compiled-in default table; a miss also
//! lazily persists the default back to the repository so subsequent
//! reads (and anything inspecting the repository directly) see it.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::CommonError;

/// External collaborator: a flat `dotted.key -> JSON value` store.
/// `forge-repo` provides the SQLite-backed implementation; tests use
/// `MemorySettingsRepository`.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CommonError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), CommonError>;
    /// All keys under a dotted prefix, e.g. `"engines"` matches
    /// `"engines.inactivityTimeoutMinutes"` and `"engines.keepWarm"`.
    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, Value>, CommonError>;
}

/// Compiled-in defaults, consulted on a repository miss.
fn default_table() -> HashMap<&'static str, Value> {
    let mut m = HashMap::new();
    m.insert("engines.inactivityTimeoutMinutes", Value::from(5));
    m.insert("engines.discoveryTimeoutSeconds", Value::from(30));
    m.insert("engines.portBase", Value::from(8766));
    m.insert("engines.portMax", Value::from(9766));
    m.insert("engines.keepWarm", Value::Array(vec![]));
    m.insert("engines.synthesis.singleActive", Value::Bool(true));
    m.insert("engines.transcription.singleActive", Value::Bool(true));
    m.insert("engines.analysis.singleActive", Value::Bool(false));
    m.insert("autoAnalyzeSegment", Value::Bool(false));
    m.insert("autoAnalyzeChapter", Value::Bool(false));
    m.insert("autoRegenerateDefects", Value::from("disabled"));
    m.insert("maxRegenerateAttempts", Value::from(3));
    m
}

/// A read-through cache in front of a [`SettingsRepository`].
pub struct Settings {
    repo: Arc<dyn SettingsRepository>,
    cache: RwLock<HashMap<String, Value>>,
    defaults: HashMap<&'static str, Value>,
}

impl Settings {
    pub fn new(repo: Arc<dyn SettingsRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
            defaults: default_table(),
        }
    }

    /// Fetch and deserialize a dotted key, falling back to the compiled-in
    /// default (persisting it back to the repository) on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CommonError> {
        if let Some(v) = self.cache.read().get(key).cloned() {
            return serde_json::from_value(v).map_err(|e| CommonError::InvalidSetting(key.to_owned(), e));
        }

        let value = match self.repo.get(key).await? {
            Some(v) => v,
            None => {
                let def = self
                    .defaults
                    .get(key)
                    .cloned()
                    .ok_or_else(|| CommonError::MissingSetting(key.to_owned()))?;
                debug!(key, "settings miss, persisting compiled-in default");
                self.repo.set(key, def.clone()).await?;
                def
            }
        };

        self.cache.write().insert(key.to_owned(), value.clone());
        serde_json::from_value(value).map_err(|e| CommonError::InvalidSetting(key.to_owned(), e))
    }

    /// Write a single dotted key, invalidating the cached entry.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), CommonError> {
        self.repo.set(key, value.clone()).await?;
        self.cache.write().insert(key.to_owned(), value);
        Ok(())
    }

    /// Write a whole composite category (e.g. the entire `engines` object)
    /// and drop every cached key under that prefix so the next read goes
    /// through to the repository. Callers (the daemon wiring) are
    /// responsible for re-notifying engine managers after this returns,
    /// per spec.md §4.8.
    pub async fn set_category(&self, prefix: &str, value: Value) -> Result<(), CommonError> {
        trace!(prefix, "invalidating settings category");
        let Value::Object(map) = value else {
            return self.set(prefix, value).await;
        };
        for (k, v) in map {
            self.set(&format!("{prefix}.{k}"), v).await?;
        }
        let mut cache = self.cache.write();
        cache.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

/// In-memory repository used by unit tests and embedders that don't need
/// durability.
#[derive(Default)]
pub struct MemorySettingsRepository {
    inner: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Value>, CommonError> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CommonError> {
        self.inner.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, Value>, CommonError> {
        Ok(self
            .inner
            .read()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_falls_back_to_default_and_persists_it() {
        let repo = Arc::new(MemorySettingsRepository::default());
        let settings = Settings::new(repo.clone());

        let timeout: u64 = settings.get("engines.inactivityTimeoutMinutes").await.unwrap();
        assert_eq!(timeout, 5);

        // Lazily persisted back to the repository.
        let stored = repo.get("engines.inactivityTimeoutMinutes").await.unwrap();
        assert_eq!(stored, Some(Value::from(5)));
    }

    #[tokio::test]
    async fn explicit_value_overrides_default() {
        let repo = Arc::new(MemorySettingsRepository::default());
        repo.set("engines.inactivityTimeoutMinutes", Value::from(9))
            .await
            .unwrap();
        let settings = Settings::new(repo);
        let timeout: u64 = settings.get("engines.inactivityTimeoutMinutes").await.unwrap();
        assert_eq!(timeout, 9);
    }

    #[tokio::test]
    async fn unknown_key_with_no_default_errors() {
        let repo = Arc::new(MemorySettingsRepository::default());
        let settings = Settings::new(repo);
        let res: Result<u64, _> = settings.get("totally.unknown.key").await;
        assert!(matches!(res, Err(CommonError::MissingSetting(_))));
    }

    #[tokio::test]
    async fn set_category_invalidates_whole_prefix() {
        let repo = Arc::new(MemorySettingsRepository::default());
        let settings = Settings::new(repo);
        let _: u64 = settings.get("engines.inactivityTimeoutMinutes").await.unwrap();

        settings
            .set_category(
                "engines",
                serde_json::json!({"inactivityTimeoutMinutes": 42}),
            )
            .await
            .unwrap();

        let timeout: u64 = settings.get("engines.inactivityTimeoutMinutes").await.unwrap();
        assert_eq!(timeout, 42);
    }
}

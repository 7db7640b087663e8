//! [`forge_common::SettingsRepository`] backed by the `global_settings`
//! key/value table. Values predating the camelCase wire convention are
//! rewritten on read via [`forge_common::translate_on_read`] (spec.md
//! §6.3).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use forge_common::{CommonError, SettingsRepository};

use crate::blocking;

pub struct SqliteSettingsRepository {
    path: PathBuf,
}

impl SqliteSettingsRepository {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Value>, CommonError> {
        let path = self.path.clone();
        let key = key.to_owned();
        blocking(path, move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM global_settings WHERE key = ?1", params![key], |r| r.get(0))
                .optional()?;
            Ok(raw
                .map(|s| serde_json::from_str::<Value>(&s))
                .transpose()?
                .map(forge_common::translate_on_read))
        })
        .await
        .map_err(Into::into)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CommonError> {
        let path = self.path.clone();
        let key = key.to_owned();
        blocking(path, move |conn| {
            let raw = serde_json::to_string(&value)?;
            conn.execute(
                "INSERT INTO global_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )?;
            Ok(())
        })
        .await
        .map_err(Into::into)
    }

    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, Value>, CommonError> {
        let path = self.path.clone();
        let prefix = prefix.to_owned();
        blocking(path, move |conn| {
            let pattern = format!("{prefix}%");
            let mut stmt = conn.prepare("SELECT key, value FROM global_settings WHERE key LIKE ?1")?;
            let rows = stmt.query_map(params![pattern], |r| {
                let key: String = r.get(0)?;
                let raw: String = r.get(1)?;
                Ok((key, raw))
            })?;
            let mut out = HashMap::new();
            for row in rows {
                let (key, raw) = row?;
                let value: Value = serde_json::from_str(&raw)?;
                out.insert(key, forge_common::translate_on_read(value));
            }
            Ok(out)
        })
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> (tempfile::TempDir, SqliteSettingsRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::Database::open(dir.path().join("test.sqlite")).unwrap();
        (dir, db.settings_repository())
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (_dir, repo) = repo();
        repo.set("engines.portBase", json!(9000)).await.unwrap();
        let value = repo.get("engines.portBase").await.unwrap();
        assert_eq!(value, Some(json!(9000)));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let (_dir, repo) = repo();
        assert_eq!(repo.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn legacy_snake_case_blob_is_translated_to_camel_case_on_read() {
        let (_dir, repo) = repo();
        repo.set("engines", json!({"inactivity_timeout_minutes": 7})).await.unwrap();
        let value = repo.get("engines").await.unwrap().unwrap();
        assert_eq!(value, json!({"inactivityTimeoutMinutes": 7}));
    }

    #[tokio::test]
    async fn get_prefix_returns_only_matching_keys() {
        let (_dir, repo) = repo();
        repo.set("engines.portBase", json!(9000)).await.unwrap();
        repo.set("engines.portMax", json!(9500)).await.unwrap();
        repo.set("autoAnalyzeSegment", json!(false)).await.unwrap();

        let matched = repo.get_prefix("engines").await.unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.contains_key("engines.portBase"));
    }
}

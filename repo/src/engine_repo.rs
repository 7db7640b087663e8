//! [`forge_engine::EngineRepository`] backed by the `engines` and
//! `engine_models` tables. `config_hash` lets `forged` detect a variant's
//! on-disk config changing between restarts without needing to diff the
//! whole row.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, Row};

use forge_common::EngineVariantId;
use forge_engine::{EngineCapabilities, EngineError, EngineKind, EngineRepository, EngineVariant, RunnerKind};

use crate::{blocking, error::RepoError};

pub struct SqliteEngineRepository {
    path: PathBuf,
}

impl SqliteEngineRepository {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn config_hash(variant: &EngineVariant) -> Result<String, RepoError> {
    let bytes = serde_json::to_vec(variant)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn row_to_variant(row: &Row<'_>) -> rusqlite::Result<EngineVariant> {
    let kind: String = row.get("kind")?;
    let runner: String = row.get("runner")?;
    let capabilities: String = row.get("capabilities")?;

    let to_sql_err = |e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(EngineVariant {
        id: EngineVariantId::new(row.get::<_, String>("variant_id")?),
        kind: serde_json::from_str::<EngineKind>(&kind).map_err(to_sql_err)?,
        runner: serde_json::from_str::<RunnerKind>(&runner).map_err(to_sql_err)?,
        target: row.get("target")?,
        default_model: row.get("default_model")?,
        capabilities: serde_json::from_str::<EngineCapabilities>(&capabilities).map_err(to_sql_err)?,
        enabled: row.get::<_, i64>("enabled")? != 0,
    })
}

fn engine_error(err: RepoError) -> EngineError {
    EngineError::Settings(forge_common::CommonError::Repository(Box::new(err)))
}

#[async_trait]
impl EngineRepository for SqliteEngineRepository {
    async fn load_all(&self) -> Result<Vec<EngineVariant>, EngineError> {
        let path = self.path.clone();
        blocking(path, move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM engines ORDER BY created_at ASC")?;
            let rows = stmt.query_map([], row_to_variant)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(engine_error)
    }

    async fn upsert(&self, variant: &EngineVariant) -> Result<(), EngineError> {
        let variant = variant.clone();
        let path = self.path.clone();
        blocking(path, move |conn| {
            let hash = config_hash(&variant)?;
            let now = chrono::Utc::now();
            conn.execute(
                "INSERT INTO engines (
                    variant_id, kind, runner, target, default_model, capabilities,
                    enabled, is_default, config_hash, created_at, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8,?9,?9)
                ON CONFLICT(variant_id) DO UPDATE SET
                    kind=excluded.kind, runner=excluded.runner, target=excluded.target,
                    default_model=excluded.default_model, capabilities=excluded.capabilities,
                    enabled=excluded.enabled, config_hash=excluded.config_hash,
                    updated_at=excluded.updated_at",
                params![
                    variant.id.as_str(),
                    serde_json::to_string(&variant.kind)?,
                    serde_json::to_string(&variant.runner)?,
                    variant.target,
                    variant.default_model,
                    serde_json::to_string(&variant.capabilities)?,
                    variant.enabled as i64,
                    hash,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(engine_error)
    }

    async fn set_enabled(&self, id: &EngineVariantId, enabled: bool) -> Result<(), EngineError> {
        let path = self.path.clone();
        let id = id.clone();
        blocking(path, move |conn| {
            conn.execute(
                "UPDATE engines SET enabled = ?1, updated_at = ?2 WHERE variant_id = ?3",
                params![enabled as i64, chrono::Utc::now(), id.as_str()],
            )?;
            Ok(())
        })
        .await
        .map_err(engine_error)
    }

    async fn delete(&self, id: &EngineVariantId) -> Result<(), EngineError> {
        let path = self.path.clone();
        let id = id.clone();
        blocking(path, move |conn| {
            conn.execute("DELETE FROM engine_models WHERE variant_id = ?1", params![id.as_str()])?;
            conn.execute("DELETE FROM engines WHERE variant_id = ?1", params![id.as_str()])?;
            Ok(())
        })
        .await
        .map_err(engine_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, SqliteEngineRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::Database::open(dir.path().join("test.sqlite")).unwrap();
        (dir, db.engine_repository())
    }

    fn variant(id: &str) -> EngineVariant {
        EngineVariant {
            id: EngineVariantId::new(id),
            kind: EngineKind::Synthesis,
            runner: RunnerKind::LocalProcess,
            target: "xtts-server --port {port}".to_owned(),
            default_model: Some("v2".to_owned()),
            capabilities: EngineCapabilities::default(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn upsert_then_load_all_round_trips() {
        let (_dir, repo) = repo();
        repo.upsert(&variant("xtts")).await.unwrap();
        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, EngineVariantId::new("xtts"));
        assert_eq!(loaded[0].target, "xtts-server --port {port}");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_conflict() {
        let (_dir, repo) = repo();
        repo.upsert(&variant("xtts")).await.unwrap();
        let mut changed = variant("xtts");
        changed.default_model = Some("v3".to_owned());
        repo.upsert(&changed).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].default_model.as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn set_enabled_persists() {
        let (_dir, repo) = repo();
        repo.upsert(&variant("xtts")).await.unwrap();
        repo.set_enabled(&EngineVariantId::new("xtts"), false).await.unwrap();
        let loaded = repo.load_all().await.unwrap();
        assert!(!loaded[0].enabled);
    }

    #[tokio::test]
    async fn delete_removes_the_variant() {
        let (_dir, repo) = repo();
        repo.upsert(&variant("xtts")).await.unwrap();
        repo.delete(&EngineVariantId::new("xtts")).await.unwrap();
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}

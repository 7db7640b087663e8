//! [`forge_store::JobRepository`] backed by the `jobs` table.
//!
//! `claim_next_pending` is the one method that actually needs atomicity
//! across the select-then-update pair; it runs inside an `IMMEDIATE`
//! transaction, which takes SQLite's writer lock up front and so serializes
//! concurrent claims the way a single-actor mailbox would (spec.md §8
//! property 1: no two workers ever claim the same job).

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use forge_common::{ChapterId, EngineVariantId, JobId};
use forge_store::{Job, JobFilter, JobKind, JobRepository, JobStatus, StoreError, WorkItem};

use crate::{blocking, error::RepoError};

pub struct SqliteJobRepository {
    path: PathBuf,
}

impl SqliteJobRepository {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let trigger_source: String = row.get("trigger_source")?;
    let work_items: String = row.get("work_items")?;
    let engine_variant_id: Option<String> = row.get("engine_variant_id")?;

    let to_sql_err = |e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(Job {
        id: JobId::new(row.get::<_, String>("id")?),
        kind: serde_json::from_str::<JobKind>(&kind).map_err(to_sql_err)?,
        chapter_id: ChapterId::new(row.get::<_, String>("chapter_id")?),
        status: serde_json::from_str::<JobStatus>(&status).map_err(to_sql_err)?,
        total_segments: row.get::<_, i64>("total_segments")? as usize,
        processed_segments: row.get::<_, i64>("processed_segments")? as usize,
        failed_segments: row.get::<_, i64>("failed_segments")? as usize,
        created_at: row.get::<_, DateTime<Utc>>("created_at")?,
        started_at: row.get::<_, Option<DateTime<Utc>>>("started_at")?,
        completed_at: row.get::<_, Option<DateTime<Utc>>>("completed_at")?,
        engine_variant_id: engine_variant_id.map(EngineVariantId::new),
        model: row.get("model")?,
        work_items: serde_json::from_str::<Vec<WorkItem>>(&work_items).map_err(to_sql_err)?,
        error: row.get("error")?,
        trigger_source: serde_json::from_str(&trigger_source).map_err(to_sql_err)?,
    })
}

fn upsert(conn: &Connection, job: &Job) -> Result<(), RepoError> {
    conn.execute(
        "INSERT INTO jobs (
            id, kind, chapter_id, status, total_segments, processed_segments,
            failed_segments, created_at, started_at, completed_at,
            engine_variant_id, model, work_items, error, trigger_source
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        ON CONFLICT(id) DO UPDATE SET
            kind=excluded.kind, chapter_id=excluded.chapter_id, status=excluded.status,
            total_segments=excluded.total_segments, processed_segments=excluded.processed_segments,
            failed_segments=excluded.failed_segments, created_at=excluded.created_at,
            started_at=excluded.started_at, completed_at=excluded.completed_at,
            engine_variant_id=excluded.engine_variant_id, model=excluded.model,
            work_items=excluded.work_items, error=excluded.error,
            trigger_source=excluded.trigger_source",
        params![
            job.id.as_str(),
            serde_json::to_string(&job.kind)?,
            job.chapter_id.as_str(),
            serde_json::to_string(&job.status)?,
            job.total_segments as i64,
            job.processed_segments as i64,
            job.failed_segments as i64,
            job.created_at,
            job.started_at,
            job.completed_at,
            job.engine_variant_id.as_ref().map(|v| v.as_str()),
            job.model,
            serde_json::to_string(&job.work_items)?,
            job.error,
            serde_json::to_string(&job.trigger_source)?,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let path = self.path.clone();
        blocking(path, move |conn| {
            upsert(&conn, &job)?;
            Ok(job)
        })
        .await
        .map_err(Into::into)
    }

    async fn claim_next_pending(&self, kind: JobKind) -> Result<Option<Job>, StoreError> {
        let path = self.path.clone();
        blocking(path, move |mut conn| {
            let kind_str = serde_json::to_string(&kind)?;
            let pending_str = serde_json::to_string(&JobStatus::Pending)?;
            let running_str = serde_json::to_string(&JobStatus::Running)?;

            // Write-exclusive transaction so the select-then-update pair is
            // atomic across concurrent claimers.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM jobs WHERE kind = ?1 AND status = ?2
                     ORDER BY created_at ASC LIMIT 1",
                    params![kind_str, pending_str],
                    |r| r.get(0),
                )
                .optional()?;

            let Some(id) = id else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3",
                params![running_str, Utc::now(), id],
            )?;

            let job = tx.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)?;
            tx.commit()?;
            Ok(Some(job))
        })
        .await
        .map_err(Into::into)
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let path = self.path.clone();
        let id = id.clone();
        blocking(path, move |conn| {
            conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.as_str()], row_to_job)
                .optional()
                .map_err(RepoError::from)
        })
        .await
        .map_err(Into::into)
    }

    async fn update(&self, job: Job) -> Result<Job, StoreError> {
        let path = self.path.clone();
        blocking(path, move |conn| {
            upsert(&conn, &job)?;
            Ok(job)
        })
        .await
        .map_err(Into::into)
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let path = self.path.clone();
        blocking(path, move |conn| {
            let mut sql = "SELECT * FROM jobs WHERE 1=1".to_owned();
            let mut bound: Vec<String> = Vec::new();

            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                bound.push(serde_json::to_string(&status)?);
            }
            if let Some(kind) = filter.kind {
                sql.push_str(" AND kind = ?");
                bound.push(serde_json::to_string(&kind)?);
            }
            if let Some(chapter_id) = &filter.chapter_id {
                sql.push_str(" AND chapter_id = ?");
                bound.push(chapter_id.as_str().to_owned());
            }
            sql.push_str(" ORDER BY created_at ASC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = filter.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }

            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                bound.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params_refs.as_slice(), row_to_job)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row?);
            }
            Ok(jobs)
        })
        .await
        .map_err(Into::into)
    }

    async fn delete(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let path = self.path.clone();
        let id = id.clone();
        blocking(path, move |conn| {
            let existing = conn
                .query_row("SELECT * FROM jobs WHERE id = ?1", params![id.as_str()], row_to_job)
                .optional()?;
            if existing.is_some() {
                conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.as_str()])?;
            }
            Ok(existing)
        })
        .await
        .map_err(Into::into)
    }

    async fn reset_stuck(&self) -> Result<Vec<Job>, StoreError> {
        let path = self.path.clone();
        blocking(path, move |conn| {
            let running_str = serde_json::to_string(&JobStatus::Running)?;
            let failed_str = serde_json::to_string(&JobStatus::Failed)?;
            let completed_at = Utc::now();

            let mut stmt = conn.prepare("SELECT * FROM jobs WHERE status = ?1")?;
            let rows = stmt.query_map(params![running_str], row_to_job)?;
            let mut stuck = Vec::new();
            for row in rows {
                stuck.push(row?);
            }

            for job in &stuck {
                conn.execute(
                    "UPDATE jobs SET status = ?1, error = ?2, completed_at = ?3 WHERE id = ?4",
                    params![failed_str, "interrupted restart", completed_at, job.id.as_str()],
                )?;
            }

            let mut updated = Vec::with_capacity(stuck.len());
            for mut job in stuck {
                job.status = JobStatus::Failed;
                job.error = Some("interrupted restart".to_owned());
                job.completed_at = Some(completed_at);
                updated.push(job);
            }
            Ok(updated)
        })
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_common::{ChapterId, JobId, SegmentId};
    use forge_store::TriggerSource;

    fn repo() -> (tempfile::TempDir, SqliteJobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = crate::Database::open(dir.path().join("test.sqlite")).unwrap();
        (dir, db.job_repository())
    }

    fn job(id: &str) -> Job {
        Job::new(
            JobId::new(id),
            JobKind::Synthesis,
            ChapterId::new("ch1"),
            Some(EngineVariantId::new("xtts")),
            Some("v2".to_owned()),
            vec![SegmentId::new("s1"), SegmentId::new("s2")],
            TriggerSource::User,
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let (_dir, repo) = repo();
        let inserted = repo.insert(job("j1")).await.unwrap();
        let fetched = repo.get(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.work_items.len(), 2);
        assert_eq!(fetched.total_segments, 2);
    }

    #[tokio::test]
    async fn claim_next_pending_transitions_to_running_and_is_idempotent_once_claimed() {
        let (_dir, repo) = repo();
        repo.insert(job("j1")).await.unwrap();

        let claimed = repo.claim_next_pending(JobKind::Synthesis).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        // Already running, so a second claim finds nothing pending left.
        let second = repo.claim_next_pending(JobKind::Synthesis).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn claim_next_pending_ignores_other_kinds() {
        let (_dir, repo) = repo();
        repo.insert(job("j1")).await.unwrap();
        let claimed = repo.claim_next_pending(JobKind::Analysis).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn reset_stuck_fails_running_jobs() {
        let (_dir, repo) = repo();
        repo.insert(job("j1")).await.unwrap();
        repo.claim_next_pending(JobKind::Synthesis).await.unwrap();

        let reset = repo.reset_stuck().await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].status, JobStatus::Failed);

        let stored = repo.get(&JobId::new("j1")).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("interrupted restart"));
    }

    #[tokio::test]
    async fn list_filters_by_kind_and_status() {
        let (_dir, repo) = repo();
        repo.insert(job("j1")).await.unwrap();
        let mut j2 = job("j2");
        j2.kind = JobKind::Analysis;
        repo.insert(j2).await.unwrap();

        let synth = repo
            .list(JobFilter {
                kind: Some(JobKind::Synthesis),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(synth.len(), 1);
        assert_eq!(synth[0].id, JobId::new("j1"));
    }

    #[tokio::test]
    async fn delete_removes_the_row_and_returns_it() {
        let (_dir, repo) = repo();
        repo.insert(job("j1")).await.unwrap();
        let deleted = repo.delete(&JobId::new("j1")).await.unwrap();
        assert!(deleted.is_some());
        assert!(repo.get(&JobId::new("j1")).await.unwrap().is_none());
    }
}

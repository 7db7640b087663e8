//! The [`JobRepository`] port and an in-memory implementation used by
//! tests (and embedders who don't need durability). `forge-repo` provides
//! the SQLite-backed implementation used in production, which makes
//! [`JobRepository::claim_next_pending`] atomic with a writer-exclusive
//! transaction (spec.md §4.1).
//!
//! Grounded on `engine/src/actors/queue.rs` (`QueueActor` /
//! `VecDeque<Job>`) and `engine/src/actors/scheduler.rs` (waiting/running
//! queues), generalized from a single in-process actor mailbox — which
//! already gives atomicity for free — to a trait a persisted backend can
//! satisfy too.

use async_trait::async_trait;
use forge_common::JobId;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::model::{Job, JobFilter, JobKind, JobStatus};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: Job) -> Result<Job, StoreError>;

    /// Atomically select the oldest `pending` job of `kind`, transition it
    /// to `running`, stamp `started_at`, and return it. Must never let two
    /// concurrent callers claim the same job (spec.md §8 property 1).
    async fn claim_next_pending(&self, kind: JobKind) -> Result<Option<Job>, StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Full-row replace. Callers serialize concurrent updates to the same
    /// job themselves (see [`crate::store::JobStore`]'s per-job lock) —
    /// the repository does not need to implement optimistic concurrency.
    async fn update(&self, job: Job) -> Result<Job, StoreError>;

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn delete(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Mark every job still `running` as `failed` ("interrupted restart")
    /// and return them, so the caller can reset their referenced segments.
    /// Called unconditionally at boot (spec.md §4.1).
    async fn reset_stuck(&self) -> Result<Vec<Job>, StoreError>;
}

/// In-memory repository, one `Mutex<BTreeMap>` guarding everything —
/// mirrors the single-actor-mailbox atomicity of `QueueActor` directly.
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: Mutex<BTreeMap<JobId, Job>>,
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock();
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn claim_next_pending(&self, kind: JobKind) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock();
        let next_id = jobs
            .values()
            .filter(|j| j.kind == kind && j.status == JobStatus::Pending)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id.clone());

        let Some(id) = next_id else { return Ok(None) };
        let job = jobs.get_mut(&id).expect("id just found in the same lock");
        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now());
        Ok(Some(job.clone()))
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    async fn update(&self, job: Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock();
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| filter.status.map(|s| s == j.status).unwrap_or(true))
            .filter(|j| filter.kind.map(|k| k == j.kind).unwrap_or(true))
            .filter(|j| {
                filter
                    .chapter_id
                    .as_ref()
                    .map(|c| c == &j.chapter_id)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        let offset = filter.offset.unwrap_or(0);
        out = out.into_iter().skip(offset).collect();
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn delete(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().remove(id))
    }

    async fn reset_stuck(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock();
        let mut reset = Vec::new();
        for job in jobs.values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.error = Some("interrupted restart".to_owned());
                job.completed_at = Some(chrono::Utc::now());
                reset.push(job.clone());
            }
        }
        Ok(reset)
    }
}

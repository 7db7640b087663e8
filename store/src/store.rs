//! [`JobStore`]: the transactional surface the API layer and the worker
//! both call through. Every mutation goes through here so status
//! transitions and the events that announce them never drift apart.
//!
//! Grounded on `engine/src/actors/queue.rs`'s `QueueActor` (allocate,
//! enqueue, fetch-by-id, run-next), generalized from a single in-memory
//! queue to a store fronting a pluggable [`JobRepository`].

use std::sync::Arc;

use forge_common::retry::{with_backoff, BackoffPolicy};
use forge_common::{ChapterId, EngineVariantId, JobId};
use forge_events::{Channel, Event, EventBus};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Job, JobFilter, JobKind, JobStatus, SegmentStatus, TriggerSource};
use crate::repo::JobRepository;
use crate::segments::SegmentSink;

pub struct JobStore {
    repo: Arc<dyn JobRepository>,
    segments: Arc<dyn SegmentSink>,
    events: EventBus,
    retry_policy: BackoffPolicy,
}

impl JobStore {
    pub fn new(repo: Arc<dyn JobRepository>, segments: Arc<dyn SegmentSink>, events: EventBus) -> Self {
        Self {
            repo,
            segments,
            events,
            retry_policy: BackoffPolicy::default(),
        }
    }

    /// Run once at process start: any job left `running` means the
    /// process died mid-job. Fail them outright rather than silently
    /// resume — spec.md §4.1 leaves partially-applied side effects (a
    /// half-written audio file) as the worker's problem to detect on
    /// next run, not this store's.
    pub async fn recover_stuck_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let reset = with_backoff(self.retry_policy, || self.repo.reset_stuck()).await?;
        for job in &reset {
            self.reset_unfinished_segments(job).await;
        }
        Ok(reset)
    }

    /// Resets every work-item's segment still `queued`/`processing` back
    /// to `pending` — the referenced-segment half of a `reset_stuck` or
    /// `delete_with_cleanup` that the job repository can't do itself,
    /// since segments live behind `SegmentSink`, not the job repo.
    async fn reset_unfinished_segments(&self, job: &Job) {
        for item in job.pending_work_items() {
            if let Ok(Some(segment)) = self.segments.get(&item.segment_id).await {
                if matches!(segment.status, SegmentStatus::Queued | SegmentStatus::Processing) {
                    if let Err(e) = self.segments.set_status(&item.segment_id, SegmentStatus::Pending).await {
                        warn!(segment = %item.segment_id, error = %e, "failed to reset segment status");
                    }
                }
            }
        }
    }

    pub async fn create_job(
        &self,
        kind: JobKind,
        chapter_id: ChapterId,
        engine_variant_id: Option<EngineVariantId>,
        model: Option<String>,
        trigger_source: TriggerSource,
    ) -> Result<Job, StoreError> {
        let segment_ids = self
            .segments
            .segment_ids_for_chapter(&chapter_id)
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        self.create_job_for_segments(kind, chapter_id, engine_variant_id, model, segment_ids, trigger_source)
            .await
    }

    /// Like [`JobStore::create_job`] but against an explicit segment list
    /// rather than the chapter's full set — used by the regenerate
    /// auto-chain policy, which only wants the segments analysis flagged.
    pub async fn create_job_for_segments(
        &self,
        kind: JobKind,
        chapter_id: ChapterId,
        engine_variant_id: Option<EngineVariantId>,
        model: Option<String>,
        segment_ids: Vec<forge_common::SegmentId>,
        trigger_source: TriggerSource,
    ) -> Result<Job, StoreError> {
        let job = Job::new(
            JobId::new(Uuid::new_v4().to_string()),
            kind,
            chapter_id,
            engine_variant_id,
            model,
            segment_ids,
            trigger_source,
        );
        let job = with_backoff(self.retry_policy, || self.repo.insert(job.clone())).await?;

        let (channel, event_name) = match job.kind {
            JobKind::Analysis => (Channel::Quality, "quality.job.created"),
            JobKind::Synthesis => (Channel::Jobs, "job.created"),
        };
        self.events.publish(Event::new(
            channel,
            event_name,
            json!({
                "id": job.id.as_str(),
                "kind": job.kind,
                "chapterId": job.chapter_id.as_str(),
                "totalSegments": job.total_segments,
                "triggerSource": job.trigger_source,
            }),
        ));
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job, StoreError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.as_str().to_owned()))
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        self.repo.list(filter).await
    }

    /// `pending` jobs are cancelled immediately; `running` jobs move to
    /// `cancelling` and the worker finishes the in-flight work-item
    /// before observing the cancellation (spec.md §4.2).
    pub async fn cancel_job(&self, id: &JobId) -> Result<Job, StoreError> {
        let mut job = self.get_job(id).await?;
        job.status = match job.status {
            JobStatus::Pending => JobStatus::Cancelled,
            JobStatus::Running => JobStatus::Cancelling,
            other => {
                return Err(StoreError::WrongState(
                    id.as_str().to_owned(),
                    format!("{other:?}"),
                ))
            }
        };
        if job.status == JobStatus::Cancelled {
            job.completed_at = Some(chrono::Utc::now());
        }
        let job = with_backoff(self.retry_policy, || self.repo.update(job.clone())).await?;
        let event_name = if job.status == JobStatus::Cancelled { "job.cancelled" } else { "job.cancelling" };
        self.publish_status_changed(event_name, &job);
        Ok(job)
    }

    /// Re-queues a `failed` or `cancelled` job's remaining pending
    /// work-items. Completed work-items are left untouched, so resume
    /// never redoes work (spec.md §9 idempotence).
    pub async fn resume_job(&self, id: &JobId) -> Result<Job, StoreError> {
        let mut job = self.get_job(id).await?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(StoreError::WrongState(
                id.as_str().to_owned(),
                format!("{:?}", job.status),
            ));
        }
        if job.pending_work_items().next().is_none() {
            return Err(StoreError::NothingToResume(id.as_str().to_owned()));
        }
        job.status = JobStatus::Pending;
        job.error = None;
        job.completed_at = None;
        let job = with_backoff(self.retry_policy, || self.repo.update(job.clone())).await?;
        self.events.publish(Event::new(
            Channel::Jobs,
            "job.resumed",
            json!({
                "id": job.id.as_str(),
                "status": job.status,
                "processedSegments": job.processed_segments,
                "resumedAt": forge_common::format_utc_z(chrono::Utc::now()),
            }),
        ));
        Ok(job)
    }

    /// Deletes a job and resets any of its referenced segments still
    /// `queued`/`processing` back to `pending`, same as `reset_stuck`'s
    /// cleanup for a crashed job — deleting a job mid-flight must not
    /// strand its segments in a state no worker will ever revisit.
    pub async fn delete_with_cleanup(&self, id: &JobId) -> Result<(), StoreError> {
        let job = self.get_job(id).await?;
        if job.status == JobStatus::Running {
            return Err(StoreError::WrongState(
                id.as_str().to_owned(),
                "running".to_owned(),
            ));
        }
        self.reset_unfinished_segments(&job).await;
        self.repo.delete(id).await?;
        self.events.publish(Event::new(
            Channel::Jobs,
            "job.deleted",
            json!({"id": id.as_str()}),
        ));
        Ok(())
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    /// Exposed beyond the crate for integration tests and embedders that
    /// need direct repository access (e.g. fixture setup for boundary
    /// cases); ordinary callers should go through the methods above,
    /// which keep status transitions and event emission in lockstep.
    pub fn repo(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    pub fn segments(&self) -> &Arc<dyn SegmentSink> {
        &self.segments
    }

    fn publish_status_changed(&self, event_name: &'static str, job: &Job) {
        self.events.publish(Event::new(
            Channel::Jobs,
            event_name,
            json!({
                "id": job.id.as_str(),
                "status": job.status,
                "processedSegments": job.processed_segments,
                "failedSegments": job.failed_segments,
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SegmentSnapshot, SegmentStatus};
    use crate::repo::MemoryJobRepository;
    use crate::segments::SegmentSinkError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    struct FakeSegments {
        chapters: Mutex<BTreeMap<String, Vec<forge_common::SegmentId>>>,
        statuses: Mutex<BTreeMap<forge_common::SegmentId, SegmentStatus>>,
    }

    #[async_trait]
    impl SegmentSink for FakeSegments {
        async fn get(
            &self,
            id: &forge_common::SegmentId,
        ) -> Result<Option<SegmentSnapshot>, SegmentSinkError> {
            let Some(status) = self.statuses.lock().get(id).copied() else {
                return Ok(None);
            };
            Ok(Some(SegmentSnapshot {
                id: id.clone(),
                chapter_id: ChapterId::new("ch1"),
                text: "text".to_owned(),
                kind: crate::model::SegmentKind::Standard,
                status,
                frozen: false,
                deleted: false,
                language: "en".to_owned(),
                speaker: None,
                pause_ms: 0,
                regenerate_attempts: 0,
            }))
        }

        async fn segment_ids_for_chapter(
            &self,
            chapter_id: &ChapterId,
        ) -> Result<Vec<forge_common::SegmentId>, SegmentSinkError> {
            Ok(self
                .chapters
                .lock()
                .get(chapter_id.as_str())
                .cloned()
                .unwrap_or_default())
        }

        async fn set_status(
            &self,
            id: &forge_common::SegmentId,
            status: SegmentStatus,
        ) -> Result<(), SegmentSinkError> {
            self.statuses.lock().insert(id.clone(), status);
            Ok(())
        }

        async fn record_audio(
            &self,
            _id: &forge_common::SegmentId,
            _audio_path: &str,
            _duration_ms: u64,
        ) -> Result<(), SegmentSinkError> {
            Ok(())
        }

        async fn increment_regenerate_attempts(
            &self,
            _id: &forge_common::SegmentId,
        ) -> Result<u32, SegmentSinkError> {
            Ok(1)
        }
    }

    async fn make_store(segment_ids: Vec<&str>) -> JobStore {
        let mut chapters = BTreeMap::new();
        let ids: Vec<forge_common::SegmentId> = segment_ids
            .into_iter()
            .map(forge_common::SegmentId::new)
            .collect();
        chapters.insert("ch1".to_owned(), ids.clone());
        let statuses = ids.into_iter().map(|id| (id, SegmentStatus::Pending)).collect();
        let segments = Arc::new(FakeSegments {
            chapters: Mutex::new(chapters),
            statuses: Mutex::new(statuses),
        });
        let repo = Arc::new(MemoryJobRepository::default());
        let events = EventBus::spawn().await.expect("bus spawns");
        JobStore::new(repo, segments, events)
    }

    #[tokio::test]
    async fn create_job_freezes_total_segments() {
        let store = make_store(vec!["s1", "s2", "s3"]).await;
        let job = store
            .create_job(
                JobKind::Synthesis,
                ChapterId::new("ch1"),
                None,
                None,
                TriggerSource::User,
            )
            .await
            .expect("create succeeds");
        assert_eq!(job.total_segments, 3);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_pending_job_is_immediate() {
        let store = make_store(vec!["s1"]).await;
        let job = store
            .create_job(JobKind::Synthesis, ChapterId::new("ch1"), None, None, TriggerSource::User)
            .await
            .unwrap();
        let cancelled = store.cancel_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn resume_requires_pending_work_items() {
        let store = make_store(vec!["s1"]).await;
        let mut job = store
            .create_job(JobKind::Synthesis, ChapterId::new("ch1"), None, None, TriggerSource::User)
            .await
            .unwrap();
        job.status = JobStatus::Failed;
        job.work_items[0].job_status = crate::model::WorkItemStatus::Completed;
        store.repo().update(job.clone()).await.unwrap();

        let err = store.resume_job(&job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NothingToResume(_)));
    }

    #[tokio::test]
    async fn recovering_a_stuck_job_resets_its_unfinished_segments_to_pending() {
        let store = make_store(vec!["s1", "s2"]).await;
        let mut job = store
            .create_job(JobKind::Synthesis, ChapterId::new("ch1"), None, None, TriggerSource::User)
            .await
            .unwrap();
        job.status = JobStatus::Running;
        store.repo().update(job.clone()).await.unwrap();

        let s1 = forge_common::SegmentId::new("s1");
        let s2 = forge_common::SegmentId::new("s2");
        store.segments().set_status(&s1, SegmentStatus::Processing).await.unwrap();
        store.segments().set_status(&s2, SegmentStatus::Queued).await.unwrap();

        let recovered = store.recover_stuck_jobs().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, JobStatus::Failed);

        assert_eq!(store.segments().get(&s1).await.unwrap().unwrap().status, SegmentStatus::Pending);
        assert_eq!(store.segments().get(&s2).await.unwrap().unwrap().status, SegmentStatus::Pending);
    }

    #[tokio::test]
    async fn deleting_a_job_resets_its_unfinished_segments_to_pending() {
        let store = make_store(vec!["s1"]).await;
        let job = store
            .create_job(JobKind::Synthesis, ChapterId::new("ch1"), None, None, TriggerSource::User)
            .await
            .unwrap();

        let s1 = forge_common::SegmentId::new("s1");
        store.segments().set_status(&s1, SegmentStatus::Processing).await.unwrap();

        store.delete_with_cleanup(&job.id).await.unwrap();

        assert_eq!(store.segments().get(&s1).await.unwrap().unwrap().status, SegmentStatus::Pending);
        assert!(store.get_job(&job.id).await.is_err(), "job row is gone");
    }
}

//! Cross-subsystem auto-chaining (spec.md §4.7): a finished synthesis job
//! can kick off an analysis job for the same chapter, and a finished
//! analysis job that flags low-scoring segments can kick off a
//! regenerate-only synthesis job for just those segments.
//!
//! This lives in forge-store rather than importing "the synthesis
//! worker" or "the analysis worker" from each other, per the no-direct-
//! import rule: both directions go through [`JobStore::create_job`] and
//! the shared [`EngineDispatch`] port, never through each other's
//! internals.

use std::sync::Arc;

use forge_common::Settings;
use tracing::{info, warn};

use crate::dispatch::EngineDispatch;
use crate::model::{Job, JobKind, JobStatus, SegmentStatus, TriggerSource};
use crate::store::JobStore;
use crate::worker::JobLifecycleHook;

const AUTO_ANALYZE_CHAPTER_KEY: &str = "autoAnalyzeChapter";
const AUTO_ANALYZE_SEGMENT_KEY: &str = "autoAnalyzeSegment";
const AUTO_REGENERATE_KEY: &str = "autoRegenerateDefects";
const MAX_REGENERATE_ATTEMPTS_KEY: &str = "maxRegenerateAttempts";

pub struct AutoChainPolicy {
    store: Arc<JobStore>,
    dispatch: Arc<dyn EngineDispatch>,
    settings: Arc<Settings>,
}

impl AutoChainPolicy {
    pub fn new(store: Arc<JobStore>, dispatch: Arc<dyn EngineDispatch>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            dispatch,
            settings,
        }
    }

    /// spec.md §4.7 #1: examine exactly the work-items whose segments
    /// now have produced audio (not the whole chapter, and not segments
    /// this job left failed), gated on `autoAnalyzeSegment` for a
    /// single-segment synthesis job or `autoAnalyzeChapter` otherwise.
    async fn maybe_chain_to_analysis(&self, job: &Job) {
        if job.kind != JobKind::Synthesis || job.status != JobStatus::Completed {
            return;
        }
        let key = if job.total_segments == 1 { AUTO_ANALYZE_SEGMENT_KEY } else { AUTO_ANALYZE_CHAPTER_KEY };
        let enabled = self.settings.get::<bool>(key).await.unwrap_or(false);
        if !enabled {
            return;
        }
        if !self.dispatch.has_variant_for(JobKind::Analysis).await {
            warn!(chapter = %job.chapter_id, "auto-analyze enabled but no analysis engine is installed, skipping");
            return;
        }

        let mut produced = Vec::new();
        for item in &job.work_items {
            if let Ok(Some(segment)) = self.store.segments().get(&item.segment_id).await {
                if segment.status == SegmentStatus::Completed {
                    produced.push(item.segment_id.clone());
                }
            }
        }
        if produced.is_empty() {
            return;
        }

        info!(chapter = %job.chapter_id, segments = produced.len(), "auto-chaining completed synthesis job into an analysis job");
        if let Err(e) = self
            .store
            .create_job_for_segments(JobKind::Analysis, job.chapter_id.clone(), None, None, produced, TriggerSource::AutoAnalyze)
            .await
        {
            warn!(error = %e, "failed to create auto-chained analysis job");
        }
    }

    async fn regenerate_mode(&self) -> String {
        self.settings
            .get::<String>(AUTO_REGENERATE_KEY)
            .await
            .unwrap_or_else(|_| "disabled".to_owned())
    }

    /// Bundled half of spec.md §4.7 #2: runs once the analysis job
    /// finishes, batching every still-eligible defect into one regenerate
    /// job. `per-segment` mode instead acts immediately, through
    /// [`AutoChainPolicy::on_segment_defect`], so there is nothing left
    /// to do here for it.
    async fn maybe_chain_to_regenerate(&self, job: &Job) {
        if job.kind != JobKind::Analysis || !matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return;
        }
        if job.failed_segments == 0 {
            return;
        }
        if self.regenerate_mode().await != "bundled" {
            return;
        }
        if !self.dispatch.has_variant_for(JobKind::Synthesis).await {
            warn!(chapter = %job.chapter_id, "auto-regenerate enabled but no synthesis engine is installed, skipping");
            return;
        }

        let flagged = self.flagged_segment_ids(job).await;
        if flagged.is_empty() {
            return;
        }

        for id in &flagged {
            if let Err(e) = self.store.segments().increment_regenerate_attempts(id).await {
                warn!(segment = %id, error = %e, "failed to record a regenerate attempt");
            }
        }
        info!(chapter = %job.chapter_id, flagged = flagged.len(), "auto-chaining flagged segments into a bundled regenerate job");
        if let Err(e) = self
            .store
            .create_job_for_segments(JobKind::Synthesis, job.chapter_id.clone(), None, None, flagged, TriggerSource::AutoRegenerateBatch)
            .await
        {
            warn!(error = %e, "failed to create auto-chained regenerate job");
        }
    }

    /// Segments analysis left in `failed` status for this chapter, capped
    /// by `maxRegenerateAttempts` — a segment that has already exhausted
    /// its attempts stays flagged as a defect but is no longer a
    /// candidate for another regenerate job (spec.md §9). The cap is
    /// checked here, before any counter is incremented.
    async fn flagged_segment_ids(&self, job: &Job) -> Vec<forge_common::SegmentId> {
        let Ok(ids) = self.store.segments().segment_ids_for_chapter(&job.chapter_id).await else {
            return Vec::new();
        };
        let max_attempts = self.settings.get::<i64>(MAX_REGENERATE_ATTEMPTS_KEY).await.unwrap_or(3);
        let mut flagged = Vec::new();
        for id in ids {
            if let Ok(Some(segment)) = self.store.segments().get(&id).await {
                if segment.status == SegmentStatus::Failed && (segment.regenerate_attempts as i64) < max_attempts {
                    flagged.push(id);
                }
            }
        }
        flagged
    }

    /// Immediate half of spec.md §4.7 #2's `per-segment` mode: fires the
    /// moment the worker flags one segment a defect, rather than waiting
    /// for the analysis job to finish. No-op under `disabled`/`bundled`.
    async fn handle_segment_defect(&self, job: &Job, segment_id: &forge_common::SegmentId) {
        if job.kind != JobKind::Analysis || self.regenerate_mode().await != "per-segment" {
            return;
        }
        if !self.dispatch.has_variant_for(JobKind::Synthesis).await {
            warn!(chapter = %job.chapter_id, "auto-regenerate enabled but no synthesis engine is installed, skipping");
            return;
        }

        let max_attempts = self.settings.get::<i64>(MAX_REGENERATE_ATTEMPTS_KEY).await.unwrap_or(3);
        let Ok(Some(segment)) = self.store.segments().get(segment_id).await else {
            return;
        };
        if segment.regenerate_attempts as i64 >= max_attempts {
            return;
        }
        if let Err(e) = self.store.segments().increment_regenerate_attempts(segment_id).await {
            warn!(segment = %segment_id, error = %e, "failed to record a regenerate attempt");
            return;
        }

        info!(segment = %segment_id, "auto-chaining a flagged segment into an immediate regenerate job");
        if let Err(e) = self
            .store
            .create_job_for_segments(
                JobKind::Synthesis,
                job.chapter_id.clone(),
                None,
                None,
                vec![segment_id.clone()],
                TriggerSource::AutoRegenerate,
            )
            .await
        {
            warn!(error = %e, "failed to create auto-chained regenerate job");
        }
    }
}

#[async_trait::async_trait]
impl JobLifecycleHook for AutoChainPolicy {
    async fn on_job_finished(&self, job: &Job) {
        match job.kind {
            JobKind::Synthesis => self.maybe_chain_to_analysis(job).await,
            JobKind::Analysis => self.maybe_chain_to_regenerate(job).await,
        }
    }

    async fn on_segment_defect(&self, job: &Job, segment_id: &forge_common::SegmentId) {
        self.handle_segment_defect(job, segment_id).await;
    }
}

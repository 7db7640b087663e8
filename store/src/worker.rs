//! Per-kind worker loop: poll the store for the next pending job of one
//! [`JobKind`], run its work-items in order against the engine subsystem,
//! and finalize. One `Worker` runs per kind so a stuck synthesis engine
//! never starves analysis jobs (spec.md §4.2).
//!
//! Grounded on `engine/src/actors/scheduler.rs`'s tick-driven
//! waiting/running queue walk, translated from a `ractor` actor handling
//! `SchedulerMsg::Tick` into a plain polling loop — this worker has no
//! mailbox of its own to serve, so the actor machinery would only add
//! ceremony.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::dispatch::{EngineDispatch, GenerateOutcome, GenerateRequest};
use crate::model::{Job, JobKind, JobStatus, SegmentStatus, WorkItemStatus};
use crate::segments::SegmentSink;
use crate::store::JobStore;

/// Called once a job finishes, successfully or not, so auto-chain
/// policies (spec.md §4.7) can react without the worker importing them
/// directly.
#[async_trait::async_trait]
pub trait JobLifecycleHook: Send + Sync {
    async fn on_job_finished(&self, job: &Job);

    /// Called the instant analysis flags one segment a defect, while the
    /// analysis job is still running — lets `per-segment` auto-regenerate
    /// mode react immediately rather than waiting for `on_job_finished`
    /// (spec.md §4.7 #2). Default no-op; only the auto-chain policy cares.
    async fn on_segment_defect(&self, job: &Job, segment_id: &forge_common::SegmentId) {
        let _ = (job, segment_id);
    }
}

pub struct NoopLifecycleHook;

#[async_trait::async_trait]
impl JobLifecycleHook for NoopLifecycleHook {
    async fn on_job_finished(&self, _job: &Job) {}
}

pub struct WorkerConfig {
    pub kind: JobKind,
    pub poll_interval: Duration,
    /// Segment text longer than this is rejected before dispatch rather
    /// than sent to the engine and failed there (spec.md §3.2 edge cases).
    pub max_input_chars: usize,
}

impl WorkerConfig {
    pub fn for_kind(kind: JobKind) -> Self {
        Self {
            kind,
            poll_interval: Duration::from_secs(2),
            max_input_chars: 5_000,
        }
    }
}

pub struct Worker {
    store: Arc<JobStore>,
    dispatch: Arc<dyn EngineDispatch>,
    hook: Arc<dyn JobLifecycleHook>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<JobStore>,
        dispatch: Arc<dyn EngineDispatch>,
        hook: Arc<dyn JobLifecycleHook>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            dispatch,
            hook,
            config,
        }
    }

    /// Spawns the poll loop and returns a handle whose drop (or explicit
    /// `shutdown`) stops it gracefully after the in-flight job finishes.
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (tx, rx) = watch::channel(false);
        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run(rx).await });
        WorkerHandle {
            shutdown: tx,
            task: Some(task),
        }
    }

    #[instrument(skip(self, shutdown), fields(kind = ?self.config.kind))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("worker shutting down");
                        return;
                    }
                }
            }

            match self.store.repo().claim_next_pending(self.config.kind).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {}
                Err(e) => error!(error = %e, "failed to poll for pending jobs"),
            }
        }
    }

    async fn process_job(&self, mut job: Job) {
        info!(job_id = %job.id, total = job.total_segments, "starting job");
        self.store.events().publish(forge_events::Event::new(
            forge_events::Channel::Jobs,
            "job.started",
            serde_json::json!({"id": job.id.as_str(), "status": job.status}),
        ));

        let pending: Vec<_> = job
            .pending_work_items()
            .map(|w| w.segment_id.clone())
            .collect();

        for segment_id in pending {
            if self.observe_cancellation(&mut job).await {
                break;
            }

            let Ok(Some(segment)) = self.store.segments().get(&segment_id).await else {
                warn!(segment = %segment_id, "segment referenced by job no longer exists, skipping");
                self.complete_work_item(&mut job, &segment_id).await;
                continue;
            };
            if segment.frozen || segment.deleted {
                self.complete_work_item(&mut job, &segment_id).await;
                continue;
            }

            if segment.text.chars().count() > self.config.max_input_chars {
                self.fail_segment(&mut job, &segment_id, "segment text exceeds the configured length limit").await;
                continue;
            }

            self.store.events().publish(forge_events::Event::new(
                forge_events::Channel::Jobs,
                "segment.started",
                serde_json::json!({"id": segment_id.as_str(), "jobId": job.id.as_str()}),
            ));

            let _ = self
                .store
                .segments()
                .set_status(&segment_id, SegmentStatus::Processing)
                .await;

            let request = GenerateRequest {
                kind: self.config.kind,
                engine_variant_id: match &job.engine_variant_id {
                    Some(id) => id.clone(),
                    None => {
                        self.fail_segment(&mut job, &segment_id, "no engine variant assigned to this job").await;
                        continue;
                    }
                },
                model: job.model.clone(),
                segment,
            };

            match self.dispatch.generate(request).await {
                Ok(GenerateOutcome::Synthesis { audio_path, duration_ms }) => {
                    let _ = self
                        .store
                        .segments()
                        .record_audio(&segment_id, &audio_path, duration_ms)
                        .await;
                    self.store.events().publish(forge_events::Event::new(
                        forge_events::Channel::Jobs,
                        "segment.completed",
                        serde_json::json!({"id": segment_id.as_str(), "jobId": job.id.as_str(), "audioPath": audio_path}),
                    ));
                    self.complete_work_item(&mut job, &segment_id).await;
                }
                Ok(GenerateOutcome::Analysis { score, issues }) => {
                    let is_defect = !issues.is_empty();
                    self.store.events().publish(forge_events::Event::new(
                        forge_events::Channel::Segments,
                        "segment.analyzed",
                        serde_json::json!({"id": segment_id.as_str(), "score": score, "issues": issues, "defect": is_defect}),
                    ));
                    if is_defect {
                        // Defect segments are what auto-regenerate chains
                        // on (`AutoChainPolicy::flagged_segment_ids`), so
                        // they're tracked the same way a client-error
                        // segment is: `Failed` status, job-level
                        // `failed_segments` counted. The regenerate-attempt
                        // counter itself is incremented by the auto-chain
                        // policy, which checks the attempt cap first.
                        self.fail_segment(&mut job, &segment_id, "analysis classified this segment as a defect").await;
                        self.hook.on_segment_defect(&job, &segment_id).await;
                    } else {
                        let _ = self.store.segments().set_status(&segment_id, SegmentStatus::Completed).await;
                        self.complete_work_item(&mut job, &segment_id).await;
                    }
                }
                Err(e) => {
                    self.fail_segment(&mut job, &segment_id, &e.to_string()).await;
                }
            }
        }

        self.finalize_job(job).await;
    }

    async fn observe_cancellation(&self, job: &mut Job) -> bool {
        match self.store.get_job(&job.id).await {
            Ok(fresh) if fresh.status == JobStatus::Cancelling => {
                job.status = JobStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    async fn complete_work_item(&self, job: &mut Job, segment_id: &forge_common::SegmentId) {
        if let Some(item) = job.work_items.iter_mut().find(|w| &w.segment_id == segment_id) {
            item.job_status = WorkItemStatus::Completed;
        }
        job.processed_segments += 1;
    }

    async fn fail_segment(&self, job: &mut Job, segment_id: &forge_common::SegmentId, reason: &str) {
        warn!(segment = %segment_id, reason, "segment failed");
        let _ = self.store.segments().set_status(segment_id, SegmentStatus::Failed).await;
        self.store.events().publish(forge_events::Event::new(
            forge_events::Channel::Jobs,
            "segment.failed",
            serde_json::json!({"id": segment_id.as_str(), "jobId": job.id.as_str(), "reason": reason}),
        ));
        if let Some(item) = job.work_items.iter_mut().find(|w| &w.segment_id == segment_id) {
            item.job_status = WorkItemStatus::Completed;
        }
        job.failed_segments += 1;
    }

    async fn finalize_job(&self, mut job: Job) {
        if job.status == JobStatus::Pending {
            // put back for the next poll (retryable error mid-job)
            let _ = self.store.repo().update(job).await;
            return;
        }
        if job.status != JobStatus::Cancelled {
            job.status = if job.is_fully_processed() && job.failed_segments == 0 {
                JobStatus::Completed
            } else if job.is_fully_processed() {
                JobStatus::Failed
            } else {
                job.status
            };
        }
        job.completed_at = Some(chrono::Utc::now());
        if job.status == JobStatus::Failed && job.error.is_none() {
            job.error = Some(format!(
                "[JOB_PARTIAL_FAILURE]processed:{};failed:{};total:{}",
                job.processed_segments, job.failed_segments, job.total_segments
            ));
        }

        info!(job_id = %job.id, status = ?job.status, "job finished");
        let event_name = match job.status {
            JobStatus::Completed => "job.completed",
            JobStatus::Failed => "job.failed",
            JobStatus::Cancelled => "job.cancelled",
            other => {
                warn!(job_id = %job.id, status = ?other, "finalizing a job in an unexpected non-terminal status");
                "job.failed"
            }
        };
        self.store.events().publish(forge_events::Event::new(
            forge_events::Channel::Jobs,
            event_name,
            serde_json::json!({
                "id": job.id.as_str(),
                "status": job.status,
                "processedSegments": job.processed_segments,
                "failedSegments": job.failed_segments,
                "error": job.error,
            }),
        ));

        if let Ok(job) = self.store.repo().update(job).await {
            self.hook.on_job_finished(&job).await;
        }
    }
}

pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

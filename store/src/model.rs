//! Job, work-item, and the minimal segment view the worker needs.
//!
//! Grounded on `engine/src/job.rs`'s `Job { name, list: VecDeque<Box<dyn
//! Runnable>> }`, generalized from an in-process task list to the
//! durable, resumable work-item list spec.md §3.1/§9 describes.

use chrono::{DateTime, Utc};
use forge_common::{ChapterId, EngineVariantId, JobId, SegmentId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Synthesis,
    Analysis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkItemStatus {
    Pending,
    Completed,
}

/// One entry in a job's ordered work-item list — the source of truth for
/// resume (spec.md §3.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub segment_id: SegmentId,
    pub job_status: WorkItemStatus,
}

impl WorkItem {
    pub fn pending(segment_id: SegmentId) -> Self {
        Self {
            segment_id,
            job_status: WorkItemStatus::Pending,
        }
    }
}

/// How a job was created, carried through to the `job.created` event so
/// clients (and our own tests) can distinguish user-initiated jobs from
/// auto-chained ones (spec.md §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    User,
    AutoAnalyze,
    AutoRegenerate,
    AutoRegenerateBatch,
}

impl Default for TriggerSource {
    fn default() -> Self {
        TriggerSource::User
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub chapter_id: ChapterId,
    pub status: JobStatus,
    /// Frozen at creation time; never changed, even across resume.
    pub total_segments: usize,
    pub processed_segments: usize,
    pub failed_segments: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub engine_variant_id: Option<EngineVariantId>,
    pub model: Option<String>,
    pub work_items: Vec<WorkItem>,
    pub error: Option<String>,
    pub trigger_source: TriggerSource,
}

impl Job {
    pub fn new(
        id: JobId,
        kind: JobKind,
        chapter_id: ChapterId,
        engine_variant_id: Option<EngineVariantId>,
        model: Option<String>,
        segment_ids: Vec<SegmentId>,
        trigger_source: TriggerSource,
    ) -> Self {
        let total = segment_ids.len();
        Self {
            id,
            kind,
            chapter_id,
            status: JobStatus::Pending,
            total_segments: total,
            processed_segments: 0,
            failed_segments: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            engine_variant_id,
            model,
            work_items: segment_ids.into_iter().map(WorkItem::pending).collect(),
            error: None,
            trigger_source,
        }
    }

    pub fn pending_work_items(&self) -> impl Iterator<Item = &WorkItem> {
        self.work_items.iter().filter(|w| w.job_status == WorkItemStatus::Pending)
    }

    pub fn is_fully_processed(&self) -> bool {
        self.processed_segments + self.failed_segments >= self.total_segments
    }
}

#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub chapter_id: Option<ChapterId>,
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentKind {
    Standard,
    Divider,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
}

/// The view of a segment the worker needs; segments themselves are owned
/// by the external project subsystem (spec.md §3.2) and reached through
/// [`crate::segments::SegmentSink`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSnapshot {
    pub id: SegmentId,
    pub chapter_id: ChapterId,
    pub text: String,
    pub kind: SegmentKind,
    pub status: SegmentStatus,
    pub frozen: bool,
    pub deleted: bool,
    pub language: String,
    pub speaker: Option<String>,
    pub pause_ms: u32,
    pub regenerate_attempts: u32,
}

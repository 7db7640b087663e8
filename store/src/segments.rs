//! Port onto the externally-owned segment/chapter subsystem (spec.md
//! §3.2). The worker and auto-chain policies only ever touch segments
//! through this trait — forge-store has no opinion on where segment text
//! or audio actually live.
//!
//! Grounded on `sources/src/access/mod.rs`'s pattern of one narrow trait
//! per external dependency, implemented per-backend and injected at the
//! binary's wiring point.

use async_trait::async_trait;
use forge_common::{ChapterId, SegmentId};
use thiserror::Error;

use crate::model::{SegmentSnapshot, SegmentStatus};

#[derive(Debug, Error)]
pub enum SegmentSinkError {
    #[error("segment {0} not found")]
    NotFound(String),
    #[error("chapter {0} not found")]
    ChapterNotFound(String),
    #[error("segment sink backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

#[async_trait]
pub trait SegmentSink: Send + Sync {
    async fn get(&self, id: &SegmentId) -> Result<Option<SegmentSnapshot>, SegmentSinkError>;

    /// Ordered, non-deleted segment ids for a chapter — the set a new
    /// synthesis or analysis job is built from (spec.md §4.1).
    async fn segment_ids_for_chapter(
        &self,
        chapter_id: &ChapterId,
    ) -> Result<Vec<SegmentId>, SegmentSinkError>;

    async fn set_status(
        &self,
        id: &SegmentId,
        status: SegmentStatus,
    ) -> Result<(), SegmentSinkError>;

    /// Record a produced audio artifact and move the segment to
    /// `completed`. `duration_ms` is advisory, used for chapter totals.
    async fn record_audio(
        &self,
        id: &SegmentId,
        audio_path: &str,
        duration_ms: u64,
    ) -> Result<(), SegmentSinkError>;

    async fn increment_regenerate_attempts(&self, id: &SegmentId) -> Result<u32, SegmentSinkError>;
}

//! Stand-in for the externally-owned segment/chapter subsystem
//! (spec.md §3.2 Non-goals): this daemon doesn't own chapter text or
//! audio, but it still needs something behind `SegmentSink` to run
//! end-to-end without a separate project wired in. Good enough for a
//! single-process demo or local development; a real deployment replaces
//! this with an adapter over wherever chapters actually live.
//!
//! Grounded on the `FakeSegments` test double in `forge-store`'s own
//! test suite (`store::store::tests`), promoted from a test fixture to a
//! small real implementation behind a `parking_lot::Mutex`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use forge_common::{ChapterId, SegmentId};
use forge_store::{SegmentKind, SegmentSink, SegmentSinkError, SegmentSnapshot, SegmentStatus};

pub struct MemorySegmentSink {
    segments: Mutex<BTreeMap<SegmentId, SegmentSnapshot>>,
    chapters: Mutex<BTreeMap<ChapterId, Vec<SegmentId>>>,
}

impl MemorySegmentSink {
    pub fn new() -> Self {
        Self {
            segments: Mutex::new(BTreeMap::new()),
            chapters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seed a chapter with standard segments of the given text, in
    /// order. Used by `forged`'s demo wiring and by tests.
    pub fn seed_chapter(&self, chapter_id: &ChapterId, texts: &[&str]) {
        let mut ids = Vec::with_capacity(texts.len());
        for text in texts {
            let id = SegmentId::new(uuid::Uuid::new_v4().to_string());
            self.segments.lock().insert(
                id.clone(),
                SegmentSnapshot {
                    id: id.clone(),
                    chapter_id: chapter_id.clone(),
                    text: (*text).to_owned(),
                    kind: SegmentKind::Standard,
                    status: SegmentStatus::Pending,
                    frozen: false,
                    deleted: false,
                    language: "en".to_owned(),
                    speaker: None,
                    pause_ms: 0,
                    regenerate_attempts: 0,
                },
            );
            ids.push(id);
        }
        self.chapters.lock().insert(chapter_id.clone(), ids);
    }
}

impl Default for MemorySegmentSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentSink for MemorySegmentSink {
    async fn get(&self, id: &SegmentId) -> Result<Option<SegmentSnapshot>, SegmentSinkError> {
        Ok(self.segments.lock().get(id).cloned())
    }

    async fn segment_ids_for_chapter(&self, chapter_id: &ChapterId) -> Result<Vec<SegmentId>, SegmentSinkError> {
        Ok(self.chapters.lock().get(chapter_id).cloned().unwrap_or_default())
    }

    async fn set_status(&self, id: &SegmentId, status: SegmentStatus) -> Result<(), SegmentSinkError> {
        let mut segments = self.segments.lock();
        let segment = segments.get_mut(id).ok_or_else(|| SegmentSinkError::NotFound(id.as_str().to_owned()))?;
        segment.status = status;
        Ok(())
    }

    async fn record_audio(&self, id: &SegmentId, audio_path: &str, duration_ms: u64) -> Result<(), SegmentSinkError> {
        let mut segments = self.segments.lock();
        let segment = segments.get_mut(id).ok_or_else(|| SegmentSinkError::NotFound(id.as_str().to_owned()))?;
        segment.status = SegmentStatus::Completed;
        let _ = (audio_path, duration_ms);
        Ok(())
    }

    async fn increment_regenerate_attempts(&self, id: &SegmentId) -> Result<u32, SegmentSinkError> {
        let mut segments = self.segments.lock();
        let segment = segments.get_mut(id).ok_or_else(|| SegmentSinkError::NotFound(id.as_str().to_owned()))?;
        segment.regenerate_attempts += 1;
        Ok(segment.regenerate_attempts)
    }
}

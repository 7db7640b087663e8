//! Persistent job queue, per-kind worker loop, and the auto-chain
//! policies that connect synthesis and analysis jobs (spec.md §3–4).

pub use autochain::AutoChainPolicy;
pub use dispatch::{DispatchError, EngineDispatch, GenerateOutcome, GenerateRequest};
pub use error::StoreError;
pub use model::{
    Job, JobFilter, JobKind, JobStatus, SegmentKind, SegmentSnapshot, SegmentStatus, TriggerSource,
    WorkItem, WorkItemStatus,
};
pub use repo::{JobRepository, MemoryJobRepository};
pub use segments::{SegmentSink, SegmentSinkError};
pub use store::JobStore;
pub use worker::{JobLifecycleHook, NoopLifecycleHook, Worker, WorkerConfig, WorkerHandle};

mod autochain;
mod dispatch;
mod error;
mod model;
mod repo;
mod segments;
mod store;
mod worker;

//! Shared plumbing used across the forge workspace: UTC timestamp
//! formatting, the dotted-key settings cache, a small backoff helper, and
//! the logging/telemetry bootstrap.
//!

pub use camel::translate_on_read;
pub use error::CommonError;
pub use ids::{ChapterId, EngineVariantId, JobId, SegmentId};
pub use settings::{Settings, SettingsRepository};
pub use time::{format_utc_z, utc_now_z};

pub mod camel;
mod error;
mod ids;
pub mod retry;
pub mod settings;
pub mod telemetry;
mod time;

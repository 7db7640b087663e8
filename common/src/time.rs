//! Timestamp formatting.
//!
//! Every timestamp that leaves the process — event payloads, API
//! responses, persisted rows read back for display — must be UTC with an
//! explicit `Z` suffix. Implicit local-time serialization is how clients
//! end up showing negative durations.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time, formatted as RFC3339 with an explicit `Z` (never `+00:00`).
pub fn utc_now_z() -> String {
    format_utc_z(Utc::now())
}

/// Format an arbitrary UTC instant the same way.
pub fn format_utc_z(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

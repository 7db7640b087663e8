//! Wire shape for everything broadcast on the event bus (spec.md §5).
//! Every event carries `_channel`/`_timestamp` framing fields alongside
//! the event's own camelCase payload, so a client can demultiplex a
//! single socket without inspecting the payload shape first.

use chrono::{DateTime, Utc};
use forge_common::format_utc_z;
use serde::Serialize;
use serde_json::Value;

/// Channels a subscriber can filter on. `All` is the default and the one
/// the keepalive ping is broadcast on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    Jobs,
    Segments,
    Engines,
    Quality,
    System,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Jobs => "jobs",
            Channel::Segments => "segments",
            Channel::Engines => "engines",
            Channel::Quality => "quality",
            Channel::System => "system",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Event {
    pub channel: Channel,
    pub name: &'static str,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(channel: Channel, name: &'static str, payload: Value) -> Self {
        Self {
            channel,
            name,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Flattens `payload`'s object fields alongside the envelope fields,
    /// so consumers see one flat camelCase JSON object per event.
    pub fn to_wire(&self) -> Value {
        let mut out = serde_json::Map::new();
        if let Value::Object(fields) = &self.payload {
            out.extend(fields.clone());
        } else {
            out.insert("data".to_owned(), self.payload.clone());
        }
        out.insert("event".into(), Value::String(self.name.to_owned()));
        out.insert("_channel".into(), Value::String(self.channel.as_str().to_owned()));
        out.insert(
            "_timestamp".into(),
            Value::String(format_utc_z(self.timestamp)),
        );
        Value::Object(out)
    }
}

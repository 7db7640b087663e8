//! Real-time event bus (spec.md §5): a `ractor` actor fanning events out
//! to bounded per-subscriber queues, plus the typed event constructors
//! forge-store and forge-engine use to publish.

pub use bus::SUBSCRIBER_QUEUE_CAPACITY;
pub use event::{Channel, Event};
pub use handle::{EventBus, EventBusError, Subscriber};

mod bus;
mod event;
mod handle;

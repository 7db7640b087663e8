//! The event bus actor: one mailbox, a set of subscriber queues, fan-out
//! on every publish. Grounded on `engine/src/actors/results.rs`'s
//! `ResultsActor` (`ractor::Actor` with a `BTreeMap`-backed state), here
//! keyed by subscription id instead of job id.
//!
//! Each subscriber gets a bounded `tokio::mpsc` channel. A slow consumer
//! does not block publishers or other subscribers: a full queue drops the
//! new event for that subscriber only (spec.md §5 — "non-blocking,
//! evict on full").

use std::collections::HashMap;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::event::{Channel, Event};

pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub channels: Vec<Channel>,
    sender: mpsc::Sender<Event>,
}

pub enum EventBusMsg {
    Publish(Event),
    Subscribe {
        channels: Vec<Channel>,
        reply: ractor::RpcReplyPort<(Uuid, mpsc::Receiver<Event>)>,
    },
    Unsubscribe(Uuid),
}

pub struct EventBusState {
    subscribers: HashMap<Uuid, Subscription>,
}

pub struct EventBusActor;

#[ractor::async_trait]
impl Actor for EventBusActor {
    type Msg = EventBusMsg;
    type State = EventBusState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(EventBusState {
            subscribers: HashMap::new(),
        })
    }

    #[tracing::instrument(skip(self, _myself, state))]
    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EventBusMsg::Publish(event) => {
                for sub in state.subscribers.values() {
                    if !sub.channels.contains(&event.channel) {
                        continue;
                    }
                    if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(event.clone()) {
                        warn!(subscriber = %sub.id, channel = ?event.channel, "dropping event, subscriber queue is full");
                    }
                }
            }
            EventBusMsg::Subscribe { channels, reply } => {
                let id = Uuid::new_v4();
                let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
                state.subscribers.insert(
                    id,
                    Subscription {
                        id,
                        channels,
                        sender: tx,
                    },
                );
                let _ = reply.send((id, rx));
            }
            EventBusMsg::Unsubscribe(id) => {
                state.subscribers.remove(&id);
            }
        }
        Ok(())
    }
}

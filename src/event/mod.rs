//! Contains the events emitted by a [`Topology`](crate::Topology) and the subscription handle
//! used to observe them.

pub mod command;
pub mod sdam;

use tokio::sync::broadcast;

use crate::{error::Error, options::ServerAddress};

pub use command::CommandEvent;
pub use sdam::SdamEvent;

const EVENT_CHANNEL_CAPACITY: usize = 512;

/// Published when the topology (or, in non-replica-set deployments, any of its servers) first
/// establishes contact with a server.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ConnectEvent {
    /// The unique id of the topology.
    pub topology_id: u64,

    /// The address of the server whose first successful check produced this event.
    pub address: ServerAddress,
}

/// Published when an operation dispatched by the topology observes a server error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ErrorEvent {
    /// The unique id of the topology.
    pub topology_id: u64,

    /// The address of the server that produced the error.
    pub address: ServerAddress,

    /// The error itself.
    pub error: Error,
}

/// Any event emitted by a topology.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    /// A Server Discovery and Monitoring event.
    Sdam(SdamEvent),

    /// A command monitoring event.
    Command(CommandEvent),

    /// A first-connect notification.
    Connect(ConnectEvent),

    /// A server error notification.
    Error(ErrorEvent),
}

/// Fans typed events out to any number of subscribers. Emission never blocks; subscribers that
/// fall too far behind skip the oldest events.
#[derive(Clone, Debug)]
pub(crate) struct EventEmitter {
    sender: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: impl Into<Event>) {
        let _: std::result::Result<_, _> = self.sender.send(event.into());
    }

    pub(crate) fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

impl From<SdamEvent> for Event {
    fn from(event: SdamEvent) -> Self {
        Event::Sdam(event)
    }
}

impl From<CommandEvent> for Event {
    fn from(event: CommandEvent) -> Self {
        Event::Command(event)
    }
}

impl From<ConnectEvent> for Event {
    fn from(event: ConnectEvent) -> Self {
        Event::Connect(event)
    }
}

impl From<ErrorEvent> for Event {
    fn from(event: ErrorEvent) -> Self {
        Event::Error(event)
    }
}

/// A subscription to the event stream of one topology.
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscriber {
    /// The next event, or `None` once the topology's worker has shut down. Events missed due to
    /// subscriber lag are skipped silently.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

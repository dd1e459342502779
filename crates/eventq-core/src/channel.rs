use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    error::EngineError,
    normalization::normalize_fatal_error,
    sink::EventSink,
    types::{Message, RegistrationSnapshot},
};

/// Broadcast event stream type used by subscribers.
pub type EventStream = broadcast::Receiver<EngineEvent>;

/// Engine results as seen by channel subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineEvent {
    /// First successful register-or-poll of a run.
    Ready { initial_load: bool },
    /// A fresh queue's registration data was persisted.
    RegistrationProcessed(RegistrationSnapshot),
    /// One ordered, already persisted message batch.
    NewMessages { messages: Vec<Message> },
    /// The poll loop terminated.
    FatalError { code: String, message: String },
}

/// Sink that fans engine results out to any number of subscribers.
#[derive(Clone, Debug)]
pub struct EventChannels {
    event_tx: broadcast::Sender<EngineEvent>,
}

impl EventChannels {
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; a send with no subscribers is dropped and
    /// slow subscribers observe `RecvError::Lagged`.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl EventSink for EventChannels {
    fn on_ready(&self, initial_load: bool) {
        self.emit(EngineEvent::Ready { initial_load });
    }

    fn on_registration_processed(&self, snapshot: RegistrationSnapshot) {
        self.emit(EngineEvent::RegistrationProcessed(snapshot));
    }

    fn on_new_messages(&self, messages: Vec<Message>) {
        self.emit(EngineEvent::NewMessages { messages });
    }

    fn on_fatal(&self, error: &EngineError) {
        self.emit(normalize_fatal_error(error));
    }
}

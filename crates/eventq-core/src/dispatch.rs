use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::{
    error::EngineError,
    persistence::Persistence,
    session::SessionHandle,
    sink::EventSink,
    types::{Message, RawEvent, TypedEvent},
};

/// Outcome of dispatching one poll batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Id of the last record of the batch; the new cursor.
    pub last_event_id: Option<i64>,
    /// Messages handed to the sink.
    pub messages: usize,
    /// Last pointer value applied from this batch.
    pub pointer: Option<i64>,
    /// Records of a known type whose payload could not be decoded.
    pub skipped: usize,
}

/// Turns raw poll batches into ordered typed results.
///
/// Pointer moves are applied to the session as they are scanned. Messages are
/// collected, persisted as one batch and then handed to the sink in one call.
pub struct EventDispatcher {
    persistence: Arc<dyn Persistence>,
    sink: Arc<dyn EventSink>,
    session: SessionHandle,
}

impl EventDispatcher {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        sink: Arc<dyn EventSink>,
        session: SessionHandle,
    ) -> Self {
        Self {
            persistence,
            sink,
            session,
        }
    }

    /// Dispatch a batch in server order. The batch is not re-sorted.
    pub fn dispatch(&self, events: Vec<RawEvent>) -> Result<DispatchSummary, EngineError> {
        let mut summary = DispatchSummary {
            last_event_id: events.last().map(|event| event.id),
            ..DispatchSummary::default()
        };
        let mut messages = Vec::new();

        for raw in events {
            let event_id = raw.id;
            match TypedEvent::from_raw(raw) {
                Ok(TypedEvent::Message(message)) => messages.push(message),
                Ok(TypedEvent::Pointer(pointer)) => {
                    self.session.set_pointer(pointer);
                    summary.pointer = Some(pointer);
                }
                Ok(TypedEvent::Other { id, kind }) => {
                    trace!(event_id = id, %kind, "ignoring event type");
                }
                Err(err) => {
                    warn!(event_id, error = %err, "skipping undecodable event");
                    summary.skipped += 1;
                }
            }
        }

        summary.messages = messages.len();
        if !messages.is_empty() {
            self.deliver(messages)?;
        }

        Ok(summary)
    }

    fn deliver(&self, messages: Vec<Message>) -> Result<(), EngineError> {
        let stored = self
            .persistence
            .persist_messages(&messages)
            .map_err(|err| EngineError::storage("persist_messages", err))?;

        if let Some(last) = messages.last() {
            self.persistence
                .extend_newest_range(last.id)
                .map_err(|err| EngineError::storage("extend_newest_range", err))?;
        }

        info!(count = messages.len(), "received messages");
        debug!(stored = ?stored, "message batch persisted");
        self.sink.on_new_messages(messages);
        Ok(())
    }
}

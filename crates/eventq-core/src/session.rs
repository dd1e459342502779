use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::{EngineState, QueueState};

/// Point-in-time view of the session, safe to hand to any reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub queue_id: Option<String>,
    pub last_event_id: i64,
    pub pointer: Option<i64>,
    pub max_message_id: Option<i64>,
    pub engine_state: EngineState,
}

/// Shared session view written by the engine task and read by everyone else.
///
/// Every update replaces the whole snapshot, so readers never see a queue id
/// paired with a cursor from a different queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot {
            last_event_id: -1,
            ..SessionSnapshot::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn publish_queue(&self, queue: &QueueState) {
        self.tx.send_modify(|snapshot| {
            snapshot.queue_id = queue.queue_id().map(str::to_owned);
            snapshot.last_event_id = queue.last_event_id();
        });
    }

    pub(crate) fn publish_registration(
        &self,
        queue: &QueueState,
        pointer: i64,
        max_message_id: i64,
    ) {
        self.tx.send_modify(|snapshot| {
            snapshot.queue_id = queue.queue_id().map(str::to_owned);
            snapshot.last_event_id = queue.last_event_id();
            snapshot.pointer = Some(pointer);
            snapshot.max_message_id = Some(max_message_id);
        });
    }

    pub(crate) fn set_pointer(&self, pointer: i64) {
        self.tx.send_modify(|snapshot| snapshot.pointer = Some(pointer));
    }

    pub(crate) fn set_engine_state(&self, state: EngineState) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.engine_state == state {
                return false;
            }
            snapshot.engine_state = state;
            true
        });
    }
}

//! In-process collaborators for engine tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{sync::watch, time::Instant};

use crate::{
    error::EngineError,
    persistence::{Persistence, StoreError},
    session::SessionHandle,
    sink::EventSink,
    transport::{ApiRequest, Transport, TransportError},
    types::{Message, Person, RegistrationSnapshot, Stream},
};

/// One scripted transport reaction.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Result<String, TransportError>),
    /// Never completes; the call only ends through cancellation.
    Hang,
}

impl Step {
    pub fn json(value: Value) -> Self {
        Step::Reply(Ok(value.to_string()))
    }

    pub fn status(status: u16, message: &str) -> Self {
        Step::Reply(Err(TransportError::Status {
            status,
            message: message.to_owned(),
        }))
    }

    pub fn error(err: TransportError) -> Self {
        Step::Reply(Err(err))
    }
}

/// Transport that replays a fixed script and records every request with the
/// (virtual) time it was issued. Once the script is exhausted calls hang.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<(Instant, ApiRequest)>>,
    count_tx: watch::Sender<usize>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            count_tx,
        }
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Milliseconds between consecutive requests.
    pub fn gaps_ms(&self) -> Vec<u128> {
        let requests = self.requests.lock().expect("requests lock");
        requests
            .windows(2)
            .map(|pair| pair[1].0.duration_since(pair[0].0).as_millis())
            .collect()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        let mut rx = self.count_tx.subscribe();
        rx.wait_for(|seen| *seen >= count)
            .await
            .expect("transport outlives the test");
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<String, TransportError> {
        let step = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push((Instant::now(), request.clone()));
            self.count_tx.send_replace(requests.len());
            self.steps.lock().expect("steps lock").pop_front()
        };

        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Hang) | None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Ready(bool),
    Registration(RegistrationSnapshot),
    /// Message ids of one batch and the session pointer observed at delivery.
    Messages {
        ids: Vec<i64>,
        pointer_seen: Option<i64>,
    },
    Fatal(String),
}

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    session: Option<SessionHandle>,
}

impl RecordingSink {
    pub fn observing(session: SessionHandle) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            session: Some(session),
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn ready_calls(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Ready(initial_load) => Some(initial_load),
                _ => None,
            })
            .collect()
    }

    pub fn message_batches(&self) -> Vec<(Vec<i64>, Option<i64>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Messages { ids, pointer_seen } => Some((ids, pointer_seen)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl EventSink for RecordingSink {
    fn on_ready(&self, initial_load: bool) {
        self.record(SinkCall::Ready(initial_load));
    }

    fn on_registration_processed(&self, snapshot: RegistrationSnapshot) {
        self.record(SinkCall::Registration(snapshot));
    }

    fn on_new_messages(&self, messages: Vec<Message>) {
        let pointer_seen = self
            .session
            .as_ref()
            .and_then(|session| session.snapshot().pointer);
        self.record(SinkCall::Messages {
            ids: messages.iter().map(|message| message.id).collect(),
            pointer_seen,
        });
    }

    fn on_fatal(&self, error: &EngineError) {
        self.record(SinkCall::Fatal(error.code.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Streams(usize),
    People(usize),
    Messages(Vec<i64>),
    Trim(usize),
    Range(i64),
}

#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    fail_messages: AtomicBool,
    fail_people_once: AtomicBool,
}

impl RecordingStore {
    pub fn failing_messages() -> Self {
        let store = Self::default();
        store.fail_messages.store(true, Ordering::SeqCst);
        store
    }

    /// Store whose first `persist_people` call fails; later calls succeed.
    pub fn failing_people_once() -> Self {
        let store = Self::default();
        store.fail_people_once.store(true, Ordering::SeqCst);
        store
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl Persistence for RecordingStore {
    fn persist_streams(&self, streams: &[Stream]) -> Result<(), StoreError> {
        self.record(StoreCall::Streams(streams.len()));
        Ok(())
    }

    fn persist_people(&self, people: &[Person]) -> Result<(), StoreError> {
        if self.fail_people_once.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_owned()));
        }
        self.record(StoreCall::People(people.len()));
        Ok(())
    }

    fn persist_messages(&self, messages: &[Message]) -> Result<Vec<i64>, StoreError> {
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_owned()));
        }
        let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
        self.record(StoreCall::Messages(ids.clone()));
        Ok(ids)
    }

    fn trim_old_messages(&self, keep: usize) -> Result<usize, StoreError> {
        self.record(StoreCall::Trim(keep));
        Ok(0)
    }

    fn extend_newest_range(&self, last_message_id: i64) -> Result<(), StoreError> {
        self.record(StoreCall::Range(last_message_id));
        Ok(())
    }
}

pub fn registration_body(queue_id: &str, last_event_id: i64) -> Value {
    json!({
        "result": "success",
        "queue_id": queue_id,
        "last_event_id": last_event_id,
        "pointer": 10,
        "max_message_id": 100,
        "subscriptions": [{"name": "general", "color": "#76ce90"}],
        "realm_users": [
            {"email": "alice@example.com", "full_name": "Alice"},
            {"email": "bob@example.com", "full_name": "Bob"}
        ]
    })
}

pub fn message_event(event_id: i64, message_id: i64) -> Value {
    json!({
        "id": event_id,
        "type": "message",
        "message": {
            "id": message_id,
            "type": "stream",
            "sender_email": "alice@example.com",
            "sender_full_name": "Alice",
            "content": format!("message {message_id}"),
            "subject": "tests",
            "timestamp": 1_700_000_000,
            "display_recipient": "general"
        }
    })
}

pub fn pointer_event(event_id: i64, pointer: i64) -> Value {
    json!({"id": event_id, "type": "pointer", "pointer": pointer})
}

pub fn events_body(events: Vec<Value>) -> Value {
    json!({"result": "success", "events": events})
}

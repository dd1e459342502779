use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::retry::BackoffPolicy;

const DEFAULT_MESSAGE_RETENTION: usize = 5_000;

/// Poll engine lifecycle state reported to observers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No live queue; the next iteration registers one.
    #[default]
    Unregistered,
    /// A queue is registered and the loop is polling it.
    Polling,
    /// Sleeping after a retryable failure.
    Backoff,
    /// Stopped by cancellation.
    Aborted,
    /// Stopped by an unexpected failure.
    Fatal,
}

/// Runtime tuning for the poll engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Delay policy applied after retryable failures.
    pub backoff: BackoffPolicy,
    /// Number of stored messages kept when a fresh queue is registered.
    pub message_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            message_retention: DEFAULT_MESSAGE_RETENTION,
        }
    }
}

/// Registered queue identity and event cursor.
///
/// `queue_id == None` means the next iteration must register. The id and the
/// cursor are only ever set together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueState {
    queue_id: Option<String>,
    last_event_id: i64,
    awaiting_first_poll: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        Self::unregistered()
    }
}

impl QueueState {
    /// State with no queue; the engine registers before its first poll.
    pub fn unregistered() -> Self {
        Self {
            queue_id: None,
            last_event_id: -1,
            awaiting_first_poll: false,
        }
    }

    /// Resume an existing queue, for example one persisted by a previous process.
    pub fn resume(queue_id: impl Into<String>, last_event_id: i64) -> Self {
        Self {
            queue_id: Some(queue_id.into()),
            last_event_id,
            awaiting_first_poll: false,
        }
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    pub fn last_event_id(&self) -> i64 {
        self.last_event_id
    }

    pub fn is_registered(&self) -> bool {
        self.queue_id.is_some()
    }

    /// `true` between a registration and the first completed poll of that queue.
    pub fn awaiting_first_poll(&self) -> bool {
        self.awaiting_first_poll
    }

    pub(crate) fn assign(&mut self, queue_id: String, last_event_id: i64) {
        *self = Self {
            queue_id: Some(queue_id),
            last_event_id,
            awaiting_first_poll: true,
        };
    }

    pub(crate) fn expire(&mut self) {
        self.queue_id = None;
        self.awaiting_first_poll = false;
    }

    pub(crate) fn advance(&mut self, last_event_id: i64) {
        self.last_event_id = last_event_id;
    }

    pub(crate) fn mark_polled(&mut self) {
        self.awaiting_first_poll = false;
    }
}

/// Stream subscription as delivered with a registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stream {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub invite_only: bool,
    #[serde(default = "default_true")]
    pub in_home_view: bool,
}

/// Realm user as delivered with a registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub is_bot: bool,
}

/// Message conversation kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Stream,
    Private,
}

/// One participant of a private conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

/// Where a message was sent: a stream name or the private recipients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DisplayRecipient {
    Stream(String),
    Private(Vec<Recipient>),
}

/// Message payload carried by `message` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_email: String,
    #[serde(default)]
    pub sender_full_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub display_recipient: Option<DisplayRecipient>,
}

/// Decoded body of the registration call.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RegistrationResult {
    pub queue_id: String,
    pub last_event_id: i64,
    pub pointer: i64,
    pub max_message_id: i64,
    #[serde(default)]
    pub subscriptions: Vec<Stream>,
    #[serde(default)]
    pub realm_users: Vec<Person>,
}

/// Registration data handed to the consumer sink once it has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub pointer: i64,
    pub max_message_id: i64,
    pub streams: Vec<Stream>,
    pub people: Vec<Person>,
}

/// Decoded body of the poll call.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventsResponse {
    pub events: Vec<RawEvent>,
}

/// Event record as returned by the server, before classification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Classified event, in server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedEvent {
    /// New message.
    Message(Message),
    /// The user's read pointer moved.
    Pointer(i64),
    /// Event type this client does not consume.
    Other { id: i64, kind: String },
}

/// Why a known event type could not be decoded.
#[derive(Debug, Error)]
pub enum EventPayloadError {
    #[error("event {id} of type '{kind}' has no '{field}' field")]
    MissingField {
        id: i64,
        kind: String,
        field: &'static str,
    },
    #[error("event {id} carries an invalid message payload: {source}")]
    InvalidMessage {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

impl TypedEvent {
    /// Classify one raw record by its `type` discriminator.
    pub fn from_raw(raw: RawEvent) -> Result<Self, EventPayloadError> {
        let RawEvent {
            id,
            kind,
            mut fields,
        } = raw;

        if kind == "message" {
            let payload = fields
                .remove("message")
                .ok_or_else(|| EventPayloadError::MissingField {
                    id,
                    kind: kind.clone(),
                    field: "message",
                })?;
            return serde_json::from_value(payload)
                .map(TypedEvent::Message)
                .map_err(|source| EventPayloadError::InvalidMessage { id, source });
        }

        if kind == "pointer" {
            return match fields.get("pointer").and_then(Value::as_i64) {
                Some(pointer) => Ok(TypedEvent::Pointer(pointer)),
                None => Err(EventPayloadError::MissingField {
                    id,
                    kind,
                    field: "pointer",
                }),
            };
        }

        Ok(TypedEvent::Other { id, kind })
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawEvent {
        serde_json::from_value(value).expect("raw event should decode")
    }

    #[test]
    fn registration_assigns_id_and_cursor_together() {
        let mut state = QueueState::unregistered();
        assert!(!state.is_registered());

        state.assign("q1".to_owned(), 42);
        assert_eq!(state.queue_id(), Some("q1"));
        assert_eq!(state.last_event_id(), 42);
        assert!(state.awaiting_first_poll());

        state.mark_polled();
        state.expire();
        assert_eq!(state.queue_id(), None);
        assert!(!state.awaiting_first_poll());
    }

    #[test]
    fn classifies_message_and_pointer_events() {
        let message = raw(json!({
            "id": 44,
            "type": "message",
            "message": {
                "id": 900,
                "type": "stream",
                "sender_email": "alice@example.com",
                "content": "hello",
                "subject": "greetings",
                "display_recipient": "general"
            }
        }));
        match TypedEvent::from_raw(message).expect("message should classify") {
            TypedEvent::Message(message) => {
                assert_eq!(message.id, 900);
                assert_eq!(message.kind, MessageKind::Stream);
                assert_eq!(
                    message.display_recipient,
                    Some(DisplayRecipient::Stream("general".to_owned()))
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let pointer = raw(json!({"id": 43, "type": "pointer", "pointer": 11}));
        assert_eq!(
            TypedEvent::from_raw(pointer).expect("pointer should classify"),
            TypedEvent::Pointer(11)
        );
    }

    #[test]
    fn keeps_unknown_event_types_as_other() {
        let presence = raw(json!({"id": 7, "type": "presence", "email": "bob@example.com"}));
        assert_eq!(
            TypedEvent::from_raw(presence).expect("unknown types are not errors"),
            TypedEvent::Other {
                id: 7,
                kind: "presence".to_owned()
            }
        );
    }

    #[test]
    fn rejects_pointer_event_without_pointer_value() {
        let broken = raw(json!({"id": 9, "type": "pointer"}));
        let err = TypedEvent::from_raw(broken).expect_err("missing pointer must fail");
        assert!(matches!(
            err,
            EventPayloadError::MissingField {
                id: 9,
                field: "pointer",
                ..
            }
        ));
    }

    #[test]
    fn decodes_private_message_recipients() {
        let message: Message = serde_json::from_value(json!({
            "id": 5,
            "type": "private",
            "sender_email": "alice@example.com",
            "display_recipient": [
                {"email": "alice@example.com", "full_name": "Alice"},
                {"email": "bob@example.com"}
            ]
        }))
        .expect("private message should decode");

        match message.display_recipient {
            Some(DisplayRecipient::Private(recipients)) => {
                assert_eq!(recipients.len(), 2);
                assert_eq!(recipients[1].email, "bob@example.com");
                assert_eq!(recipients[1].full_name, "");
            }
            other => panic!("unexpected recipient: {other:?}"),
        }
    }
}

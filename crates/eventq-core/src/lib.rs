//! Long-poll event queue client engine.
//!
//! This crate registers an event queue with the server, long-polls it from a
//! background task, recovers from timeouts, expired queues and transient
//! failures, and hands ordered results to a consumer sink.

/// Broadcast sink and the event type its subscribers receive.
pub mod channel;
/// Ordered classification and delivery of poll batches.
pub mod dispatch;
/// Register/poll/recover loop.
pub mod engine;
/// Stable engine error payload and failure classification.
pub mod error;
/// Event normalization helpers.
pub mod normalization;
/// Storage contract for registration data and messages.
pub mod persistence;
/// Backoff policy used by the retry loop.
pub mod retry;
/// Background task ownership and restart.
pub mod runtime;
/// Concurrently readable session snapshot.
pub mod session;
/// Consumer callbacks.
pub mod sink;
/// Engine lifecycle state machine.
pub mod state_machine;
/// Request model and transport contract.
pub mod transport;
/// Wire and domain types.
pub mod types;

#[cfg(test)]
mod testing;

pub use channel::{EngineEvent, EventChannels, EventStream};
pub use dispatch::{DispatchSummary, EventDispatcher};
pub use engine::{ExitReason, PollEngine, RunOutcome};
pub use error::{
    EngineError, FailureKind, Recovery, classify_http_status, classify_transport_error,
    is_queue_expired,
};
pub use normalization::{conversation_label, normalize_fatal_error};
pub use persistence::{Persistence, StoreError};
pub use retry::BackoffPolicy;
pub use runtime::Poller;
pub use session::{SessionHandle, SessionSnapshot};
pub use sink::EventSink;
pub use state_machine::EngineStateMachine;
pub use transport::{ApiRequest, EVENTS_PATH, Method, REGISTER_PATH, Transport, TransportError};
pub use types::{
    DisplayRecipient, EngineConfig, EngineState, EventPayloadError, EventsResponse, Message,
    MessageKind, Person, QueueState, RawEvent, Recipient, RegistrationResult,
    RegistrationSnapshot, Stream, TypedEvent,
};

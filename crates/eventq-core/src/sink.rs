use crate::{
    error::EngineError,
    types::{Message, RegistrationSnapshot},
};

/// Consumer of engine results.
///
/// Called synchronously from the engine task. Implementations that feed a UI
/// or another runtime hand the value off (channel send, queued task) and
/// return quickly.
pub trait EventSink: Send + Sync {
    /// First successful register-or-poll of a run. `initial_load` is `true`
    /// when that was a registration.
    fn on_ready(&self, initial_load: bool);

    /// A fresh queue was registered and its streams and people were persisted.
    fn on_registration_processed(&self, snapshot: RegistrationSnapshot);

    /// One non-empty, already persisted batch of messages, in server order.
    fn on_new_messages(&self, messages: Vec<Message>);

    /// The poll loop terminated on an unexpected failure.
    fn on_fatal(&self, _error: &EngineError) {}
}

use thiserror::Error;

use crate::types::{Message, Person, Stream};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Durable home for registration data and received messages.
///
/// Every call is a unit: other readers never observe half of it.
pub trait Persistence: Send + Sync {
    fn persist_streams(&self, streams: &[Stream]) -> Result<(), StoreError>;

    fn persist_people(&self, people: &[Person]) -> Result<(), StoreError>;

    /// Store a batch of messages in one atomic step and return their ids in input order.
    fn persist_messages(&self, messages: &[Message]) -> Result<Vec<i64>, StoreError>;

    /// Drop the oldest messages until at most `keep` remain. Returns the number removed.
    fn trim_old_messages(&self, keep: usize) -> Result<usize, StoreError>;

    /// Record that every message up to `last_message_id` has been received.
    fn extend_newest_range(&self, last_message_id: i64) -> Result<(), StoreError>;
}

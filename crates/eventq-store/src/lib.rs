//! In-memory persistence for the eventq poll engine.
//!
//! Streams and people are keyed by name and email, messages by id. Every
//! contract call takes the write lock once, so concurrent readers never see
//! half of a batch.

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use eventq_core::{Message, Person, Persistence, StoreError, Stream};
use tracing::debug;

/// Contiguous span of message ids known to be fully received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRange {
    pub oldest: i64,
    pub newest: i64,
}

#[derive(Debug, Default)]
struct StoreData {
    streams: BTreeMap<String, Stream>,
    people: BTreeMap<String, Person>,
    messages: BTreeMap<i64, Message>,
    range: Option<MessageRange>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<StoreData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streams(&self) -> Result<Vec<Stream>, StoreError> {
        Ok(self.read()?.streams.values().cloned().collect())
    }

    pub fn people(&self) -> Result<Vec<Person>, StoreError> {
        Ok(self.read()?.people.values().cloned().collect())
    }

    pub fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.messages.len())
    }

    pub fn range(&self) -> Result<Option<MessageRange>, StoreError> {
        Ok(self.read()?.range)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, StoreError> {
        self.data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, StoreError> {
        self.data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))
    }
}

impl Persistence for MemoryStore {
    fn persist_streams(&self, streams: &[Stream]) -> Result<(), StoreError> {
        let mut data = self.write()?;
        for stream in streams {
            data.streams.insert(stream.name.clone(), stream.clone());
        }
        Ok(())
    }

    fn persist_people(&self, people: &[Person]) -> Result<(), StoreError> {
        let mut data = self.write()?;
        for person in people {
            data.people.insert(person.email.clone(), person.clone());
        }
        Ok(())
    }

    fn persist_messages(&self, messages: &[Message]) -> Result<Vec<i64>, StoreError> {
        let mut data = self.write()?;
        let ids = messages
            .iter()
            .map(|message| {
                data.messages.insert(message.id, message.clone());
                message.id
            })
            .collect();
        Ok(ids)
    }

    fn trim_old_messages(&self, keep: usize) -> Result<usize, StoreError> {
        let mut data = self.write()?;
        if data.messages.len() <= keep {
            return Ok(0);
        }

        let excess = data.messages.len() - keep;
        let cutoff = data.messages.keys().nth(excess).copied();
        data.messages = match cutoff {
            Some(cutoff) => data.messages.split_off(&cutoff),
            None => BTreeMap::new(),
        };

        let oldest = data.messages.keys().next().copied();
        data.range = match (data.range, oldest) {
            (Some(range), Some(oldest)) => Some(MessageRange {
                oldest: oldest.max(range.oldest),
                newest: range.newest,
            }),
            _ => None,
        };
        debug!(removed = excess, kept = data.messages.len(), "trimmed message store");
        Ok(excess)
    }

    fn extend_newest_range(&self, last_message_id: i64) -> Result<(), StoreError> {
        let mut data = self.write()?;
        data.range = Some(match data.range {
            Some(range) => MessageRange {
                oldest: range.oldest,
                newest: range.newest.max(last_message_id),
            },
            None => MessageRange {
                oldest: data
                    .messages
                    .keys()
                    .next()
                    .copied()
                    .unwrap_or(last_message_id)
                    .min(last_message_id),
                newest: last_message_id,
            },
        });
        Ok(())
    }
}

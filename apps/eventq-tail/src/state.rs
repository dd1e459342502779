//! Console state reducer for `eventq-tail`.

use std::collections::HashSet;

use eventq_core::{EngineEvent, Message, conversation_label};
use tracing::{debug, warn};

const DEFAULT_STATUS: &str = "Connecting";

/// One rendered message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub id: i64,
    pub conversation: String,
    pub sender: String,
    pub body: String,
}

impl MessageLine {
    fn from_message(message: &Message) -> Self {
        let sender = if message.sender_full_name.is_empty() {
            message.sender_email.clone()
        } else {
            message.sender_full_name.clone()
        };
        Self {
            id: message.id,
            conversation: conversation_label(message),
            sender,
            body: message.content.clone(),
        }
    }

    pub fn render(&self) -> String {
        format!("[{}] {}: {}", self.conversation, self.sender, self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailSnapshot {
    pub status_text: String,
    pub error_text: Option<String>,
    pub stream_count: usize,
    pub people_count: usize,
    pub pointer: Option<i64>,
    pub messages: Vec<MessageLine>,
}

/// Mutable app state fed by engine events.
#[derive(Debug, Clone)]
pub struct TailState {
    recent_limit: usize,
    status_text: String,
    error_text: Option<String>,
    stream_count: usize,
    people_count: usize,
    pointer: Option<i64>,
    messages: Vec<MessageLine>,
}

impl TailState {
    pub fn new(recent_limit: usize) -> Self {
        Self {
            recent_limit: recent_limit.max(1),
            status_text: DEFAULT_STATUS.to_owned(),
            error_text: None,
            stream_count: 0,
            people_count: 0,
            pointer: None,
            messages: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> TailSnapshot {
        TailSnapshot {
            status_text: self.status_text.clone(),
            error_text: self.error_text.clone(),
            stream_count: self.stream_count,
            people_count: self.people_count,
            pointer: self.pointer,
            messages: self.messages.clone(),
        }
    }

    /// Apply one engine event and return the lines to print for it.
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Vec<String> {
        match event {
            EngineEvent::Ready { initial_load } => {
                self.status_text = if initial_load {
                    "Connected".to_owned()
                } else {
                    "Resumed".to_owned()
                };
                self.error_text = None;
                vec![format!("-- {} --", self.status_text)]
            }
            EngineEvent::RegistrationProcessed(snapshot) => {
                self.stream_count = snapshot.streams.len();
                self.people_count = snapshot.people.len();
                self.pointer = Some(snapshot.pointer);
                debug!(
                    streams = self.stream_count,
                    people = self.people_count,
                    "registration applied to tail state"
                );
                vec![format!(
                    "-- {} streams, {} people --",
                    self.stream_count, self.people_count
                )]
            }
            EngineEvent::NewMessages { messages } => {
                let mut seen_ids: HashSet<i64> = self.messages.iter().map(|m| m.id).collect();
                let fresh: Vec<MessageLine> = messages
                    .iter()
                    .filter(|message| seen_ids.insert(message.id))
                    .map(MessageLine::from_message)
                    .collect();
                let suppressed = messages.len() - fresh.len();
                if suppressed > 0 {
                    debug!(suppressed, "skipped messages already shown");
                }

                let rendered = fresh.iter().map(MessageLine::render).collect();
                self.messages.extend(fresh);
                trim_to_recent(&mut self.messages, self.recent_limit);
                rendered
            }
            EngineEvent::FatalError { code, message } => {
                warn!(%code, %message, "engine fatal error surfaced to tail state");
                self.status_text = "Stopped".to_owned();
                self.error_text = Some(format!("{code}: {message}"));
                vec![format!("-- stopped: {code}: {message} --")]
            }
        }
    }

    /// Note that `skipped` events were lost because the console fell behind.
    pub fn handle_lag(&self, skipped: u64) -> String {
        warn!(skipped, "tail lagged behind engine events");
        format!("-- {skipped} events skipped --")
    }
}

fn trim_to_recent(lines: &mut Vec<MessageLine>, max_items: usize) {
    if lines.len() > max_items {
        let excess = lines.len() - max_items;
        lines.drain(0..excess);
    }
}

impl TailSnapshot {
    /// Lines printed once the poller has stopped.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("-- {} --", self.status_text)];
        if let Some(error) = &self.error_text {
            lines.push(format!("-- last error: {error} --"));
        }
        let pointer = self
            .pointer
            .map_or_else(|| "unknown".to_owned(), |pointer| pointer.to_string());
        lines.push(format!(
            "-- {} streams, {} people, pointer {pointer}, {} recent messages --",
            self.stream_count,
            self.people_count,
            self.messages.len()
        ));
        lines
    }
}

#[cfg(test)]
mod tests {
    use eventq_core::RegistrationSnapshot;
    use serde_json::json;

    use super::*;

    fn message(id: i64, content: &str) -> Message {
        serde_json::from_value(json!({
            "id": id,
            "type": "stream",
            "sender_email": "alice@example.com",
            "sender_full_name": "Alice",
            "content": content,
            "subject": "lunch",
            "display_recipient": "general"
        }))
        .expect("message fixture")
    }

    #[test]
    fn renders_new_messages_with_conversation_label() {
        let mut state = TailState::new(10);
        let lines = state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "hello")],
        });

        assert_eq!(lines, vec!["[general > lunch] Alice: hello".to_owned()]);
        assert_eq!(state.snapshot().messages.len(), 1);
    }

    #[test]
    fn keeps_only_recent_messages_without_duplicates() {
        let mut state = TailState::new(2);
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "a"), message(2, "b")],
        });
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(2, "b"), message(3, "c")],
        });

        let ids: Vec<i64> = state.snapshot().messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn redelivered_messages_are_not_printed_twice() {
        let mut state = TailState::new(5);
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "a"), message(2, "b")],
        });

        let lines = state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(2, "b"), message(3, "c"), message(3, "c")],
        });

        assert_eq!(lines, vec!["[general > lunch] Alice: c".to_owned()]);
        let ids: Vec<i64> = state.snapshot().messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn messages_evicted_from_recent_window_print_again() {
        let mut state = TailState::new(1);
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "a")],
        });
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(2, "b")],
        });

        let lines = state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "a")],
        });
        assert_eq!(lines.len(), 1);
        assert_eq!(state.snapshot().messages[0].id, 1);
    }

    #[test]
    fn summary_reports_counts_and_last_error() {
        let mut state = TailState::new(10);
        state.handle_engine_event(EngineEvent::NewMessages {
            messages: vec![message(1, "a")],
        });
        state.handle_engine_event(EngineEvent::FatalError {
            code: "bad_event_queue_id".into(),
            message: "queue expired".into(),
        });

        assert_eq!(
            state.snapshot().summary(),
            vec![
                "-- Stopped --".to_owned(),
                "-- last error: bad_event_queue_id: queue expired --".to_owned(),
                "-- 0 streams, 0 people, pointer unknown, 1 recent messages --".to_owned(),
            ]
        );
    }

    #[test]
    fn ready_and_registration_update_status() {
        let mut state = TailState::new(10);
        state.handle_engine_event(EngineEvent::RegistrationProcessed(RegistrationSnapshot {
            pointer: 10,
            max_message_id: 100,
            streams: Vec::new(),
            people: Vec::new(),
        }));
        state.handle_engine_event(EngineEvent::Ready { initial_load: true });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status_text, "Connected");
        assert_eq!(snapshot.pointer, Some(10));

        state.handle_engine_event(EngineEvent::Ready {
            initial_load: false,
        });
        assert_eq!(state.snapshot().status_text, "Resumed");
    }

    #[test]
    fn fatal_error_sets_error_text() {
        let mut state = TailState::new(10);
        state.handle_engine_event(EngineEvent::FatalError {
            code: "storage_error".into(),
            message: "disk full".into(),
        });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status_text, "Stopped");
        assert_eq!(snapshot.error_text.as_deref(), Some("storage_error: disk full"));
    }
}

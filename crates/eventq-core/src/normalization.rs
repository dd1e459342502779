use crate::{
    channel::EngineEvent,
    error::EngineError,
    types::{DisplayRecipient, Message},
};

/// Convert an error into a `FatalError` engine event.
pub fn normalize_fatal_error(error: &EngineError) -> EngineEvent {
    EngineEvent::FatalError {
        code: error.code.clone(),
        message: error.message.clone(),
    }
}

/// Short human label for the conversation a message belongs to.
///
/// Stream messages read `stream > topic`; private messages list the
/// recipients' names (falling back to their emails).
pub fn conversation_label(message: &Message) -> String {
    match &message.display_recipient {
        Some(DisplayRecipient::Stream(stream)) if message.subject.is_empty() => stream.clone(),
        Some(DisplayRecipient::Stream(stream)) => format!("{stream} > {}", message.subject),
        Some(DisplayRecipient::Private(recipients)) if !recipients.is_empty() => recipients
            .iter()
            .map(|recipient| {
                if recipient.full_name.is_empty() {
                    recipient.email.as_str()
                } else {
                    recipient.full_name.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => message.sender_email.clone(),
    }
}

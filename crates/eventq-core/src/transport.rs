use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::QueueState;

/// Endpoint that creates a fresh event queue.
pub const REGISTER_PATH: &str = "v1/register";
/// Endpoint that long-polls a queue for new events.
pub const EVENTS_PATH: &str = "v1/events";

/// HTTP method of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One API call: method, endpoint path and its full parameter set.
///
/// The engine builds a new request for every call, so no parameter survives
/// from one iteration to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: &'static str,
    pub params: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: &'static str) -> Self {
        Self {
            method,
            path,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Queue registration request. Markdown rendering is disabled so message
    /// content arrives as raw text.
    pub fn register() -> Self {
        Self::new(Method::Post, REGISTER_PATH).with_param("apply_markdown", "false")
    }

    /// Poll request for a registered queue.
    ///
    /// Returns `None` when `queue` has no queue id: polling is only valid on a
    /// registered queue.
    pub fn poll(queue: &QueueState, dont_block: bool) -> Option<Self> {
        let queue_id = queue.queue_id()?;
        let mut request = Self::new(Method::Get, EVENTS_PATH)
            .with_param("queue_id", queue_id)
            .with_param("last_event_id", queue.last_event_id().to_string());
        if dont_block {
            request = request.with_param("dont_block", "true");
        }
        Some(request)
    }
}

/// Transport-level failures the engine classifies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Read or connect timeout.
    #[error("request timed out")]
    Timeout,
    /// The call was aborted on request.
    #[error("request aborted")]
    Aborted,
    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    /// Connection failed or broke mid-response.
    #[error("connection failed: {0}")]
    Connection(String),
    /// Anything the transport cannot classify further.
    #[error("transport failure: {0}")]
    Other(String),
}

/// Executes one API call and returns the raw response body.
///
/// Dropping the returned future must abort the call; the engine relies on
/// that to cancel an in-flight long-poll.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<String, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_disables_markdown() {
        let request = ApiRequest::register();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, REGISTER_PATH);
        assert_eq!(request.param("apply_markdown"), Some("false"));
        assert_eq!(request.params.len(), 1);
    }

    #[test]
    fn poll_request_requires_a_queue() {
        assert_eq!(ApiRequest::poll(&QueueState::unregistered(), true), None);
    }

    #[test]
    fn poll_request_carries_cursor_and_optional_dont_block() {
        let queue = QueueState::resume("q1", 42);

        let first = ApiRequest::poll(&queue, true).expect("queue is registered");
        assert_eq!(first.method, Method::Get);
        assert_eq!(first.param("queue_id"), Some("q1"));
        assert_eq!(first.param("last_event_id"), Some("42"));
        assert_eq!(first.param("dont_block"), Some("true"));

        let steady = ApiRequest::poll(&queue, false).expect("queue is registered");
        assert_eq!(steady.param("dont_block"), None);
    }
}

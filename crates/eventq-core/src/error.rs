use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{persistence::StoreError, transport::TransportError, types::EngineState};

const QUEUE_EXPIRED_STATUS: u16 = 400;
const QUEUE_EXPIRED_MARKERS: [&str; 2] = ["Bad event queue id", "too old"];

/// Failure class of one register or poll attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureKind {
    /// Read/connect timeout; expected after a long-poll window.
    Timeout,
    /// Server no longer knows the queue (expired or garbage-collected).
    QueueExpired,
    /// Any other HTTP error status.
    Rejected,
    /// Connection or IO failure that is neither a timeout nor an abort.
    Network,
    /// Response body could not be decoded.
    Malformed,
    /// Cancellation was requested.
    Cancelled,
    /// Persistence collaborator failed.
    Storage,
    /// Invariant break or unclassified transport failure.
    Internal,
}

/// What the poll loop does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Exit without further I/O.
    Stop,
    /// Forget the queue and register again immediately.
    Reregister,
    /// Retry immediately without touching the failure count.
    RetryNow,
    /// Count the failure and sleep before retrying.
    Backoff,
    /// Terminate the loop and report.
    Fatal,
}

impl FailureKind {
    pub fn recovery(self) -> Recovery {
        match self {
            FailureKind::Cancelled => Recovery::Stop,
            FailureKind::QueueExpired => Recovery::Reregister,
            FailureKind::Timeout => Recovery::RetryNow,
            FailureKind::Rejected | FailureKind::Network | FailureKind::Malformed => {
                Recovery::Backoff
            }
            FailureKind::Storage | FailureKind::Internal => Recovery::Fatal,
        }
    }
}

/// Stable engine error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct EngineError {
    /// Failure class driving the retry decision.
    pub category: FailureKind,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// HTTP status when the server answered with an error.
    pub status: Option<u16>,
}

impl EngineError {
    pub fn new(category: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn recovery(&self) -> Recovery {
        self.category.recovery()
    }

    pub fn cancelled() -> Self {
        Self::new(
            FailureKind::Cancelled,
            "cancelled",
            "poll loop cancellation requested",
        )
    }

    pub fn malformed(context: &str, err: impl Display) -> Self {
        Self::new(
            FailureKind::Malformed,
            "malformed_response",
            format!("{context}: {err}"),
        )
    }

    pub fn storage(operation: &str, err: StoreError) -> Self {
        Self::new(
            FailureKind::Storage,
            "storage_error",
            format!("{operation} failed: {err}"),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: EngineState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            FailureKind::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while engine is in state {current:?}"),
        )
    }
}

/// `true` when an HTTP error means the server dropped our event queue.
pub fn is_queue_expired(status: u16, message: &str) -> bool {
    status == QUEUE_EXPIRED_STATUS
        && QUEUE_EXPIRED_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
}

/// Map an HTTP error status and its message to a failure class.
pub fn classify_http_status(status: u16, message: &str) -> FailureKind {
    if is_queue_expired(status, message) {
        FailureKind::QueueExpired
    } else {
        FailureKind::Rejected
    }
}

/// Map a transport failure to an engine error.
pub fn classify_transport_error(err: TransportError) -> EngineError {
    match err {
        TransportError::Timeout => {
            EngineError::new(FailureKind::Timeout, "timeout", err.to_string())
        }
        TransportError::Aborted => {
            EngineError::new(FailureKind::Cancelled, "aborted", err.to_string())
        }
        TransportError::Status { status, message } => {
            let category = classify_http_status(status, &message);
            let code = match category {
                FailureKind::QueueExpired => "queue_expired",
                _ => "http_error",
            };
            EngineError::new(category, code, message).with_status(status)
        }
        TransportError::Connection(_) => {
            EngineError::new(FailureKind::Network, "connection_error", err.to_string())
        }
        TransportError::Other(_) => {
            EngineError::new(FailureKind::Internal, "transport_error", err.to_string())
        }
    }
}

use crate::{error::EngineError, types::EngineState};

#[derive(Debug, Clone)]
pub struct EngineStateMachine {
    state: EngineState,
}

impl Default for EngineStateMachine {
    fn default() -> Self {
        Self {
            state: EngineState::Unregistered,
        }
    }
}

impl EngineStateMachine {
    /// Machine positioned for a run that starts with or without a live queue.
    pub fn for_queue(registered: bool) -> Self {
        Self {
            state: if registered {
                EngineState::Polling
            } else {
                EngineState::Unregistered
            },
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn on_registered(&mut self) -> Result<EngineState, EngineError> {
        self.transition_from_state(EngineState::Unregistered, EngineState::Polling, "registered")
    }

    pub fn on_queue_expired(&mut self) -> Result<EngineState, EngineError> {
        self.transition_from_any_of(
            &[EngineState::Unregistered, EngineState::Polling],
            EngineState::Unregistered,
            "queue_expired",
        )
    }

    pub fn on_backoff(&mut self) -> Result<EngineState, EngineError> {
        self.transition_from_any_of(
            &[EngineState::Unregistered, EngineState::Polling],
            EngineState::Backoff,
            "backoff",
        )
    }

    pub fn on_backoff_elapsed(&mut self, registered: bool) -> Result<EngineState, EngineError> {
        let next = if registered {
            EngineState::Polling
        } else {
            EngineState::Unregistered
        };
        self.transition_from_state(EngineState::Backoff, next, "backoff_elapsed")
    }

    /// Cancellation wins from every state and repeating it is a no-op.
    pub fn on_abort(&mut self) -> EngineState {
        if self.state != EngineState::Fatal {
            self.state = EngineState::Aborted;
        }
        self.state
    }

    pub fn on_fatal(&mut self) -> EngineState {
        self.state = EngineState::Fatal;
        self.state
    }

    fn transition_from_state(
        &mut self,
        expected: EngineState,
        next: EngineState,
        action: &str,
    ) -> Result<EngineState, EngineError> {
        if self.state != expected {
            return Err(EngineError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[EngineState],
        next: EngineState,
        action: &str,
    ) -> Result<EngineState, EngineError> {
        if !expected.contains(&self.state) {
            return Err(EngineError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(next)
    }
}

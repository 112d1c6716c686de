//! Finite State Machine for owner status

use crate::errors::DeckhandError;
use crate::models::deployment::OwnerStatus;

/// Owner event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerEvent {
    /// A deployment was started
    Deploy,

    /// The running deployment finished
    Succeed,

    /// The running deployment or its creation failed
    Fail(String),

    /// The owner's workload was stopped
    Stop,
}

/// Owner status FSM
///
/// Runs are not locked per owner, so a new deployment may start from any state.
/// Only stopping is refused while a build runs since builds cannot be interrupted.
#[derive(Debug, Clone, Default)]
pub struct OwnerFsm {
    state: OwnerStatus,
    error: Option<String>,
}

impl OwnerFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted status
    pub fn from_state(state: OwnerStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> OwnerStatus {
        self.state
    }

    /// Error of the last failure, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: OwnerEvent) -> Result<OwnerStatus, DeckhandError> {
        let new_state = match (self.state, &event) {
            (_, OwnerEvent::Deploy) => {
                self.error = None;
                OwnerStatus::Running
            }
            (_, OwnerEvent::Succeed) => OwnerStatus::Done,
            (_, OwnerEvent::Fail(err)) => {
                self.error = Some(err.clone());
                OwnerStatus::Error
            }

            (OwnerStatus::Running, OwnerEvent::Stop) => {
                return Err(DeckhandError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    self.state, event
                )));
            }
            (_, OwnerEvent::Stop) => OwnerStatus::Idle,
        };

        self.state = new_state;
        Ok(new_state)
    }
}

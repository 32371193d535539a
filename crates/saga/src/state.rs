//! Saga lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::action::ActionType;
use crate::error::SagaError;
use crate::workflow::Transition;

/// The state of a saga execution in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          ├──► Compensating ──► RolledBack
///                          └──► RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Zero-value execution, never started.
    #[default]
    NotStarted,

    /// Forward steps are being requested.
    Running,

    /// A step failed and compensation requests are in flight.
    Compensating,

    /// All steps completed successfully (terminal state).
    Completed,

    /// Every compensable step was undone, or none needed undoing
    /// (terminal state).
    RolledBack,
}

impl SagaState {
    /// State reached after taking `transition`.
    pub fn after(transition: &Transition<'_>) -> Self {
        match transition {
            Transition::Continue {
                action: ActionType::CompensationRequest,
                ..
            } => SagaState::Compensating,
            Transition::Continue { .. } => SagaState::Running,
            Transition::Completed => SagaState::Completed,
            Transition::RolledBack => SagaState::RolledBack,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::RolledBack)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "NotStarted",
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::RolledBack => "RolledBack",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotStarted" => Ok(SagaState::NotStarted),
            "Running" => Ok(SagaState::Running),
            "Compensating" => Ok(SagaState::Compensating),
            "Completed" => Ok(SagaState::Completed),
            "RolledBack" => Ok(SagaState::RolledBack),
            other => Err(SagaError::Persistence(format!(
                "unknown saga state '{other}'"
            ))),
        }
    }
}

//! Message intents exchanged between the orchestrator and participants.

use std::str::FromStr;

use crate::error::SagaError;

/// The intent of a saga message.
///
/// Requests flow from the orchestrator to a participant; responses flow
/// back on the workflow's reply destination.
///
/// ```text
/// orchestrator ── request ─────────────► participant ── success | failure ──►
/// orchestrator ── compensation ────────► participant ── compensated ────────►
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Ask a participant to perform its step.
    Request,
    /// The participant performed its step.
    Success,
    /// The participant could not perform its step.
    Failure,
    /// Ask a participant to undo its step.
    CompensationRequest,
    /// The participant undid its step.
    Compensated,
}

impl ActionType {
    /// All action types, in protocol order.
    pub const ALL: [ActionType; 5] = [
        ActionType::Request,
        ActionType::Success,
        ActionType::Failure,
        ActionType::CompensationRequest,
        ActionType::Compensated,
    ];

    /// Actions a participant may reply with.
    pub const RESPONSES: [ActionType; 3] = [
        ActionType::Success,
        ActionType::Failure,
        ActionType::Compensated,
    ];

    /// Returns the wire token for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Request => "request",
            ActionType::Success => "success",
            ActionType::Failure => "failure",
            ActionType::CompensationRequest => "compensation",
            ActionType::Compensated => "compensated",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, ActionType::Request)
    }

    pub fn is_compensation_request(&self) -> bool {
        matches!(self, ActionType::CompensationRequest)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionType::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionType::Failure)
    }

    pub fn is_compensated(&self) -> bool {
        matches!(self, ActionType::Compensated)
    }

    /// Returns true if a participant may send this action as a reply.
    pub fn is_response(&self) -> bool {
        Self::RESPONSES.contains(self)
    }
}

impl FromStr for ActionType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(ActionType::Request),
            "success" => Ok(ActionType::Success),
            "failure" => Ok(ActionType::Failure),
            // "compensate" is an older spelling still sent by some participants.
            "compensation" | "compensate" => Ok(ActionType::CompensationRequest),
            "compensated" => Ok(ActionType::Compensated),
            other => Err(SagaError::UnknownActionToken(other.to_string())),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

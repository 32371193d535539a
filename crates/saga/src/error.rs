//! Saga error types.

use common::GlobalId;
use thiserror::Error;

use crate::action::ActionType;
use crate::execution::Version;

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A string did not name any known action type.
    #[error("Unknown action type: {0}")]
    UnknownActionToken(String),

    /// An event type string did not have the `<saga>.<step>.<action>` shape.
    #[error("Malformed event type '{value}': {reason}")]
    MalformedEventType { value: String, reason: String },

    /// Raw bytes could not be decoded into a message.
    #[error("Message decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// A workflow or step name cannot be used as an event type segment.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Two steps of one workflow share a name.
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// Two workflows share a name.
    #[error("Duplicate workflow name: {0}")]
    DuplicateWorkflow(String),

    /// The message references a step outside the workflow's topology.
    #[error("Current step not found in message workflow: {0}")]
    CurrentStepNotFound(String),

    /// The message action has no transition defined for it.
    #[error("Unknown action type for transition: {0}")]
    UnknownActionType(ActionType),

    /// No value is stored under the requested execution key.
    #[error("State key not found: {0}")]
    StateKeyNotFound(String),

    /// The stored value does not fit the requested shape.
    #[error("State value under '{key}' could not be decoded: {source}")]
    StateDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A participant-supplied payload builder failed.
    #[error("Payload build failed for step '{step}': {reason}")]
    PayloadBuild { step: String, reason: String },

    /// No workflow is registered under the given name.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The stored execution moved on since it was loaded.
    #[error(
        "Concurrency conflict for execution {id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        id: GlobalId,
        expected: Version,
        actual: Version,
    },

    /// The execution store rejected a read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An outbound message could not be sent.
    #[error("Publish to '{destination}' failed: {reason}")]
    Publish { destination: String, reason: String },

    /// The deduplication store failed.
    #[error("Deduplication store error: {0}")]
    Deduplication(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Creates a payload build error for a step.
    pub fn payload_build(step: impl Into<String>, reason: impl ToString) -> Self {
        SagaError::PayloadBuild {
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors caused by the message itself.
    ///
    /// Redelivering such a message can never succeed, so the dispatcher
    /// routes it to the dead-letter destination when one is configured.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SagaError::UnknownActionToken(_)
                | SagaError::MalformedEventType { .. }
                | SagaError::Decode(_)
                | SagaError::CurrentStepNotFound(_)
                | SagaError::UnknownActionType(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

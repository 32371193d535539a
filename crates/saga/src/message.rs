//! Wire messages and their structured event type.

use std::collections::BTreeMap;
use std::str::FromStr;

use common::{EventId, GlobalId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::action::ActionType;
use crate::error::{Result, SagaError};
use crate::step::Step;
use crate::workflow::Workflow;

/// Arbitrary JSON object carried by a message.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Structured `(saga, step, action)` identifier carried by every message.
///
/// Its canonical form is `"<saga>.<step>.<action>"`; `Display` and `FromStr`
/// are exact inverses and the JSON form is the quoted canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventType {
    pub saga_name: String,
    pub step_name: String,
    pub action: ActionType,
}

impl EventType {
    pub fn new(
        saga_name: impl Into<String>,
        step_name: impl Into<String>,
        action: ActionType,
    ) -> Self {
        Self {
            saga_name: saga_name.into(),
            step_name: step_name.into(),
            action,
        }
    }

    /// Returns the same saga and step with a different action.
    ///
    /// Participants use this to derive the event type of their reply.
    pub fn with_action(&self, action: ActionType) -> Self {
        Self {
            saga_name: self.saga_name.clone(),
            step_name: self.step_name.clone(),
            action,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.saga_name, self.step_name, self.action)
    }
}

impl FromStr for EventType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = |reason: String| SagaError::MalformedEventType {
            value: s.to_string(),
            reason,
        };

        if s.is_empty() {
            return Err(malformed("empty event type".to_string()));
        }

        let segments: Vec<&str> = s.split('.').collect();
        let [saga_name, step_name, action] = segments.as_slice() else {
            return Err(malformed(format!(
                "expected 3 dot-separated segments, found {}",
                segments.len()
            )));
        };

        if saga_name.is_empty() || step_name.is_empty() {
            return Err(malformed("saga and step names must not be empty".to_string()));
        }

        Ok(Self {
            saga_name: (*saga_name).to_string(),
            step_name: (*step_name).to_string(),
            action: action.parse()?,
        })
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Saga routing block of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaReply {
    /// Destination participants publish their replies to.
    pub reply_channel: String,
}

/// The unit exchanged between the orchestrator and participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The saga instance this message belongs to.
    pub global_id: GlobalId,
    /// This particular message.
    pub event_id: EventId,
    pub event_type: EventType,
    #[serde(default)]
    pub event_data: EventData,
    pub saga: SagaReply,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Creates an orchestrator message addressed to `step`.
    pub fn new(
        global_id: GlobalId,
        workflow: &Workflow,
        step: &Step<'_>,
        action: ActionType,
        event_data: EventData,
    ) -> Self {
        Self {
            global_id,
            event_id: EventId::new(),
            event_type: EventType::new(workflow.name(), step.name(), action),
            event_data,
            saga: SagaReply {
                reply_channel: workflow.reply_destination().to_string(),
            },
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a participant's reply to `request`.
    pub fn reply(request: &Message, action: ActionType, event_data: EventData) -> Self {
        Self {
            global_id: request.global_id,
            event_id: EventId::new(),
            event_type: request.event_type.with_action(action),
            event_data,
            saga: request.saga.clone(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decodes a message from its JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(SagaError::Decode)
    }

    /// Encodes the message to its JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hex SHA-256 of the canonical JSON encoding.
    ///
    /// Object keys of `event_data` and `metadata` serialize in sorted
    /// order, so equal messages always hash equally.
    pub fn content_hash(&self) -> Result<String> {
        let bytes = self.to_bytes()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

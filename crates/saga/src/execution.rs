//! Per-instance saga state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::GlobalId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::action::ActionType;
use crate::error::{Result, SagaError};
use crate::state::SagaState;
use crate::workflow::Workflow;

/// Key the saga input is stored under.
pub const INPUT_KEY: &str = "input";

/// Key a step's payload is stored under for `action`.
///
/// Responses land under `create_order.success`, outbound requests under
/// `create_order.request` and so on.
pub fn state_key(step_name: &str, action: ActionType) -> String {
    format!("{step_name}.{action}")
}

/// Version number of a stored execution, used for optimistic concurrency
/// control.
///
/// A fresh execution is at version 0; every successful save increments it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an unsaved execution.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable state of one saga run.
///
/// Holds the saga input and every payload sent or received so far, keyed
/// by [`state_key`]. Payload builders read from it to assemble the next
/// request.
#[derive(Debug, Clone)]
pub struct Execution {
    id: GlobalId,
    workflow: Arc<Workflow>,
    state: BTreeMap<String, serde_json::Value>,
    status: SagaState,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Execution {
    /// Creates a running execution of `workflow` with a fresh ID.
    pub fn new(workflow: Arc<Workflow>) -> Self {
        let now = Utc::now();
        Self {
            id: GlobalId::new(),
            workflow,
            state: BTreeMap::new(),
            status: SagaState::Running,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuilds an execution from a stored snapshot.
    ///
    /// `workflow` must be the workflow named in the snapshot.
    pub fn restore(snapshot: ExecutionSnapshot, workflow: Arc<Workflow>) -> Self {
        Self {
            id: snapshot.id,
            workflow,
            state: snapshot.state,
            status: snapshot.status,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }
    }

    pub fn id(&self) -> GlobalId {
        self.id
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn status(&self) -> SagaState {
        self.status
    }

    pub fn set_status(&mut self, status: SagaState) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Records the version the execution was stored at.
    ///
    /// Called by repositories after a successful save.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Stores `value` under `key`, replacing any earlier value.
    pub fn set_state<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.state.insert(key.into(), value);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Decodes the value under `key` into `T`.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .state
            .get(key)
            .ok_or_else(|| SagaError::StateKeyNotFound(key.to_string()))?;
        T::deserialize(value).map_err(|source| SagaError::StateDecode {
            key: key.to_string(),
            source,
        })
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    /// All stored values, ordered by key.
    pub fn state(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.state
    }

    /// Returns true only for the zero-value execution.
    pub fn is_empty(&self) -> bool {
        self.id.is_nil() && self.workflow.is_empty() && self.state.is_empty()
    }

    /// Serializable view used for storage and inspection.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            id: self.id,
            workflow: self.workflow.name().to_string(),
            status: self.status,
            version: self.version,
            state: self.state.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            id: GlobalId::nil(),
            workflow: Arc::default(),
            state: BTreeMap::new(),
            status: SagaState::NotStarted,
            version: Version::initial(),
            created_at: DateTime::default(),
            updated_at: DateTime::default(),
        }
    }
}

/// Stored form of an [`Execution`]; the workflow is kept by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub id: GlobalId,
    pub workflow: String,
    pub status: SagaState,
    pub version: Version,
    pub state: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//! Execution and workflow repositories.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::GlobalId;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::execution::{Execution, Version};
use crate::message::EventType;
use crate::workflow::Workflow;

/// Durable storage for executions.
///
/// Implementations own durability. `save` enforces optimistic concurrency:
/// it fails with [`SagaError::ConcurrencyConflict`] when the stored version
/// differs from the execution's, and bumps the execution's version on
/// success.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Loads an execution by its global ID.
    ///
    /// Returns None if no execution is stored under that ID.
    async fn find(&self, id: GlobalId) -> Result<Option<Execution>>;

    /// Inserts or updates an execution.
    async fn save(&self, execution: &mut Execution) -> Result<()>;
}

#[async_trait]
impl<R: ExecutionRepository + ?Sized> ExecutionRepository for Arc<R> {
    async fn find(&self, id: GlobalId) -> Result<Option<Execution>> {
        (**self).find(id).await
    }

    async fn save(&self, execution: &mut Execution) -> Result<()> {
        (**self).save(execution).await
    }
}

/// Lookup of workflow definitions by name.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<Arc<Workflow>>>;
}

#[derive(Debug, Default)]
struct InMemoryExecutionState {
    executions: HashMap<GlobalId, Execution>,
    fail_on_save: bool,
    save_count: usize,
}

/// In-memory execution repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    state: Arc<RwLock<InMemoryExecutionState>>,
}

impl InMemoryExecutionRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the repository to fail every save.
    pub async fn set_fail_on_save(&self, fail: bool) {
        self.state.write().await.fail_on_save = fail;
    }

    /// Returns the number of stored executions.
    pub async fn len(&self) -> usize {
        self.state.read().await.executions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.executions.is_empty()
    }

    /// Returns every stored execution, in no particular order.
    pub async fn executions(&self) -> Vec<Execution> {
        self.state.read().await.executions.values().cloned().collect()
    }

    /// Returns the number of successful saves so far.
    pub async fn save_count(&self) -> usize {
        self.state.read().await.save_count
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn find(&self, id: GlobalId) -> Result<Option<Execution>> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn save(&self, execution: &mut Execution) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_save {
            return Err(SagaError::Persistence(
                "execution store unavailable".to_string(),
            ));
        }

        let stored = state
            .executions
            .get(&execution.id())
            .map(Execution::version)
            .unwrap_or(Version::initial());
        if stored != execution.version() {
            return Err(SagaError::ConcurrencyConflict {
                id: execution.id(),
                expected: execution.version(),
                actual: stored,
            });
        }

        execution.set_version(stored.next());
        state.executions.insert(execution.id(), execution.clone());
        state.save_count += 1;
        Ok(())
    }
}

/// Immutable table of the workflows an orchestrator runs.
///
/// Built once at startup and handed to whoever needs it; resolves both by
/// workflow name and by consumable event type.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    by_name: HashMap<String, Arc<Workflow>>,
    by_event_type: HashMap<EventType, Arc<Workflow>>,
}

impl WorkflowRegistry {
    /// Builds the registry, rejecting duplicate workflow names.
    pub fn new(workflows: impl IntoIterator<Item = Workflow>) -> Result<Self> {
        let mut registry = Self::default();
        for workflow in workflows {
            let workflow = Arc::new(workflow);
            if registry.by_name.contains_key(workflow.name()) {
                return Err(SagaError::DuplicateWorkflow(workflow.name().to_string()));
            }
            for event_type in workflow.consumable_event_types() {
                registry
                    .by_event_type
                    .insert(event_type, Arc::clone(&workflow));
            }
            registry
                .by_name
                .insert(workflow.name().to_string(), workflow);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Workflow>> {
        self.by_name.get(name).cloned()
    }

    /// The workflow that consumes `event_type`, if any.
    pub fn for_event_type(&self, event_type: &EventType) -> Option<Arc<Workflow>> {
        self.by_event_type.get(event_type).cloned()
    }

    /// Reply destinations of all registered workflows, sorted.
    pub fn reply_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .by_name
            .values()
            .map(|w| w.reply_destination().to_string())
            .collect();
        destinations.sort();
        destinations.dedup();
        destinations
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[async_trait]
impl WorkflowRepository for WorkflowRegistry {
    async fn find(&self, name: &str) -> Result<Option<Arc<Workflow>>> {
        Ok(self.get(name))
    }
}

//! Step definitions and the ordered step topology of a workflow.

use std::sync::Arc;

use crate::action::ActionType;
use crate::error::{Result, SagaError};
use crate::execution::Execution;
use crate::message::EventData;

/// Builds the outbound payload of a step.
///
/// One implementation per step, supplied by participant-specific code.
/// The builder reads whatever it needs from the execution (the saga input
/// and earlier responses) and returns the `event_data` to send.
pub trait PayloadBuilder: Send + Sync {
    fn build(&self, execution: &Execution, action: ActionType) -> Result<EventData>;
}

impl<F> PayloadBuilder for F
where
    F: Fn(&Execution, ActionType) -> Result<EventData> + Send + Sync,
{
    fn build(&self, execution: &Execution, action: ActionType) -> Result<EventData> {
        self(execution, action)
    }
}

/// Static description of one step.
#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    owner_service: String,
    compensable: bool,
    payload_builder: Arc<dyn PayloadBuilder>,
}

impl StepDefinition {
    /// Creates a non-compensable step owned by `owner_service`.
    pub fn new(
        name: impl Into<String>,
        owner_service: impl Into<String>,
        payload_builder: impl PayloadBuilder + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            owner_service: owner_service.into(),
            compensable: false,
            payload_builder: Arc::new(payload_builder),
        }
    }

    /// Marks the step as compensable.
    pub fn compensable(mut self) -> Self {
        self.compensable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_service(&self) -> &str {
        &self.owner_service
    }

    pub fn is_compensable(&self) -> bool {
        self.compensable
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("owner_service", &self.owner_service)
            .field("compensable", &self.compensable)
            .finish_non_exhaustive()
    }
}

/// Append-only, ordered chain of steps.
///
/// Steps are addressed by index; next/previous are index±1 lookups.
#[derive(Debug, Clone, Default)]
pub struct StepTopology {
    steps: Vec<StepDefinition>,
}

impl StepTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step at the tail and returns it.
    ///
    /// Step names are unique within a topology.
    pub fn append(&mut self, definition: StepDefinition) -> Result<Step<'_>> {
        validate_name(&definition.name)?;
        if self.steps.iter().any(|s| s.name == definition.name) {
            return Err(SagaError::DuplicateStep(definition.name));
        }
        let index = self.steps.len();
        self.steps.push(definition);
        Ok(Step {
            topology: self,
            index,
        })
    }

    /// Looks a step up by name.
    pub fn get_step(&self, name: &str) -> Option<Step<'_>> {
        self.steps
            .iter()
            .position(|s| s.name == name)
            .map(|index| self.at(index))
    }

    /// Returns the first step.
    pub fn head(&self) -> Option<Step<'_>> {
        self.step_at(0)
    }

    /// Returns the last step.
    pub fn tail(&self) -> Option<Step<'_>> {
        self.steps.len().checked_sub(1).map(|index| self.at(index))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterates steps from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = Step<'_>> {
        (0..self.steps.len()).map(|index| self.at(index))
    }

    fn step_at(&self, index: usize) -> Option<Step<'_>> {
        (index < self.steps.len()).then(|| self.at(index))
    }

    fn at(&self, index: usize) -> Step<'_> {
        Step {
            topology: self,
            index,
        }
    }
}

/// Checks that `name` can stand as one segment of `<saga>.<step>.<action>`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('.') {
        "must not contain '.'"
    } else {
        return Ok(());
    };
    Err(SagaError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// A step positioned in its topology.
#[derive(Clone, Copy)]
pub struct Step<'a> {
    topology: &'a StepTopology,
    index: usize,
}

impl<'a> Step<'a> {
    pub fn definition(&self) -> &'a StepDefinition {
        &self.topology.steps[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.definition().name
    }

    pub fn owner_service(&self) -> &'a str {
        &self.definition().owner_service
    }

    pub fn is_compensable(&self) -> bool {
        self.definition().compensable
    }

    /// Zero-based position in the topology.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn next(&self) -> Option<Step<'a>> {
        self.topology.step_at(self.index + 1)
    }

    pub fn previous(&self) -> Option<Step<'a>> {
        self.index
            .checked_sub(1)
            .map(|index| self.topology.at(index))
    }

    /// Walks backward starting at this step and returns the first
    /// compensable one.
    ///
    /// The walk includes the receiver itself.
    pub fn first_compensable_step(&self) -> Option<Step<'a>> {
        (0..=self.index)
            .rev()
            .map(|index| self.topology.at(index))
            .find(|step| step.is_compensable())
    }

    /// Destination requests and compensation requests are sent to.
    pub fn request_destination(&self) -> String {
        format!("service.{}.request", self.owner_service())
    }

    /// Destination the owning participant publishes its own events to.
    pub fn events_destination(&self) -> String {
        format!("service.{}.events", self.owner_service())
    }

    /// Builds this step's payload for `action`.
    pub fn build_payload(&self, execution: &Execution, action: ActionType) -> Result<EventData> {
        self.definition().payload_builder.build(execution, action)
    }
}

impl PartialEq for Step<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.topology, other.topology) && self.index == other.index
    }
}

impl Eq for Step<'_> {}

impl std::fmt::Debug for Step<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("position", &self.index)
            .field("compensable", &self.is_compensable())
            .finish()
    }
}

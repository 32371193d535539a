//! Workflow definitions and the forward/compensation decision algorithm.

use crate::action::ActionType;
use crate::error::{Result, SagaError};
use crate::message::{EventType, Message};
use crate::step::{Step, StepDefinition, StepTopology, validate_name};

/// What the orchestrator does after a participant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<'a> {
    /// Send `action` to `step`.
    Continue { step: Step<'a>, action: ActionType },
    /// The last step succeeded; the saga finished.
    Completed,
    /// Nothing is left to compensate; the saga is fully rolled back.
    RolledBack,
}

impl Transition<'_> {
    /// Returns true if no further message follows.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Transition::Continue { .. })
    }
}

/// A named saga definition: ordered steps plus the reply destination
/// participants answer on.
///
/// Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    name: String,
    reply_destination: String,
    steps: StepTopology,
}

impl Workflow {
    /// Starts assembling a workflow.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.into(),
            reply_destination: None,
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reply_destination(&self) -> &str {
        &self.reply_destination
    }

    pub fn steps(&self) -> &StepTopology {
        &self.steps
    }

    /// Returns true for the zero-value workflow.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.reply_destination.is_empty() && self.steps.is_empty()
    }

    /// Every event type this workflow consumes: the success, failure and
    /// compensated replies of each step.
    pub fn consumable_event_types(&self) -> Vec<EventType> {
        self.steps
            .iter()
            .flat_map(|step| {
                ActionType::RESPONSES
                    .into_iter()
                    .map(move |action| EventType::new(self.name.as_str(), step.name(), action))
            })
            .collect()
    }

    /// Decides the next step for an inbound message.
    pub fn get_next_step(&self, message: &Message) -> Result<Transition<'_>> {
        self.next_step(&message.event_type)
    }

    /// Decides the next step given the event type of a participant reply.
    ///
    /// * `success` moves forward to the next step, or completes the saga.
    /// * `failure` starts compensating from the nearest compensable step at
    ///   or before the failed one.
    /// * `compensated` resumes the backward walk strictly before the step
    ///   that confirmed its compensation.
    ///
    /// Requests are never valid input here.
    pub fn next_step(&self, event_type: &EventType) -> Result<Transition<'_>> {
        let current = self
            .steps
            .get_step(&event_type.step_name)
            .ok_or_else(|| SagaError::CurrentStepNotFound(event_type.to_string()))?;

        let transition = match event_type.action {
            ActionType::Success => current
                .next()
                .map(|step| Transition::Continue {
                    step,
                    action: ActionType::Request,
                })
                .unwrap_or(Transition::Completed),
            ActionType::Failure => compensate(current.first_compensable_step()),
            ActionType::Compensated => compensate(
                current
                    .previous()
                    .and_then(|previous| previous.first_compensable_step()),
            ),
            action @ (ActionType::Request | ActionType::CompensationRequest) => {
                return Err(SagaError::UnknownActionType(action));
            }
        };

        Ok(transition)
    }
}

fn compensate(step: Option<Step<'_>>) -> Transition<'_> {
    step.map(|step| Transition::Continue {
        step,
        action: ActionType::CompensationRequest,
    })
    .unwrap_or(Transition::RolledBack)
}

/// Assembles a [`Workflow`], rejecting duplicate step names.
#[derive(Debug)]
pub struct WorkflowBuilder {
    name: String,
    reply_destination: Option<String>,
    steps: Vec<StepDefinition>,
}

impl WorkflowBuilder {
    /// Sets the destination participants reply to.
    ///
    /// Defaults to `saga.<name>.response`.
    pub fn reply_destination(mut self, destination: impl Into<String>) -> Self {
        self.reply_destination = Some(destination.into());
        self
    }

    /// Appends a step.
    pub fn step(mut self, definition: StepDefinition) -> Self {
        self.steps.push(definition);
        self
    }

    /// Validates names and assembles the workflow.
    ///
    /// Workflow and step names become event type segments, so they must be
    /// non-empty and free of dots.
    pub fn build(self) -> Result<Workflow> {
        validate_name(&self.name)?;
        let mut steps = StepTopology::new();
        for definition in self.steps {
            steps.append(definition)?;
        }
        let reply_destination = self
            .reply_destination
            .unwrap_or_else(|| format!("saga.{}.response", self.name));

        Ok(Workflow {
            name: self.name,
            reply_destination,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;
    use crate::message::EventData;

    fn empty_payload(_: &Execution, _: ActionType) -> Result<EventData> {
        Ok(EventData::new())
    }

    fn workflow(steps: &[(&str, bool)]) -> Workflow {
        steps
            .iter()
            .fold(Workflow::builder("create_order"), |builder, (name, compensable)| {
                let definition = StepDefinition::new(*name, "svc", empty_payload);
                builder.step(if *compensable {
                    definition.compensable()
                } else {
                    definition
                })
            })
            .build()
            .unwrap()
    }

    fn create_order_workflow() -> Workflow {
        workflow(&[
            ("create_order", true),
            ("verify_customer", false),
            ("authorize_card", true),
        ])
    }

    fn event(step: &str, action: ActionType) -> EventType {
        EventType::new("create_order", step, action)
    }

    fn continue_to(transition: Transition<'_>) -> (&str, ActionType) {
        match transition {
            Transition::Continue { step, action } => (step.name(), action),
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn test_success_moves_forward_until_completed() {
        let names = ["s1", "s2", "s3", "s4"];
        let workflow = workflow(&names.map(|n| (n, true)));

        for window in names.windows(2) {
            let transition = workflow
                .next_step(&event(window[0], ActionType::Success))
                .unwrap();
            assert_eq!(continue_to(transition), (window[1], ActionType::Request));
        }

        let last = workflow.next_step(&event("s4", ActionType::Success)).unwrap();
        assert_eq!(last, Transition::Completed);
        assert!(last.is_terminal());
    }

    #[test]
    fn test_failure_picks_nearest_compensable_at_or_before() {
        let workflow = workflow(&[("s1", true), ("s2", false), ("s3", true), ("s4", false)]);

        let expectations = [("s1", "s1"), ("s2", "s1"), ("s3", "s3"), ("s4", "s3")];
        for (failed, expected) in expectations {
            let transition = workflow
                .next_step(&event(failed, ActionType::Failure))
                .unwrap();
            assert_eq!(
                continue_to(transition),
                (expected, ActionType::CompensationRequest)
            );
        }
    }

    #[test]
    fn test_failure_with_nothing_to_compensate_rolls_back() {
        let workflow = workflow(&[("s1", false), ("s2", false), ("s3", true)]);
        let transition = workflow.next_step(&event("s2", ActionType::Failure)).unwrap();
        assert_eq!(transition, Transition::RolledBack);
    }

    #[test]
    fn test_compensated_walks_strictly_before() {
        let workflow = workflow(&[("s1", true), ("s2", false), ("s3", true), ("s4", true)]);

        let transition = workflow
            .next_step(&event("s4", ActionType::Compensated))
            .unwrap();
        assert_eq!(
            continue_to(transition),
            ("s3", ActionType::CompensationRequest)
        );

        let transition = workflow
            .next_step(&event("s3", ActionType::Compensated))
            .unwrap();
        assert_eq!(
            continue_to(transition),
            ("s1", ActionType::CompensationRequest)
        );

        let transition = workflow
            .next_step(&event("s1", ActionType::Compensated))
            .unwrap();
        assert_eq!(transition, Transition::RolledBack);
    }

    #[test]
    fn test_unknown_step_fails_for_every_action() {
        let workflow = create_order_workflow();
        for action in ActionType::ALL {
            let err = workflow
                .next_step(&event("any_other_step", action))
                .unwrap_err();
            assert!(matches!(err, SagaError::CurrentStepNotFound(_)));
        }
    }

    #[test]
    fn test_request_actions_are_rejected() {
        let workflow = create_order_workflow();
        for action in [ActionType::Request, ActionType::CompensationRequest] {
            let err = workflow.next_step(&event("create_order", action)).unwrap_err();
            assert!(matches!(err, SagaError::UnknownActionType(a) if a == action));
        }
    }

    #[test]
    fn test_scenario_failure_skips_non_compensable_then_rolls_back() {
        let workflow = create_order_workflow();

        let transition = workflow
            .next_step(&event("authorize_card", ActionType::Failure))
            .unwrap();
        // authorize_card is itself compensable, so it is compensated first
        assert_eq!(
            continue_to(transition),
            ("authorize_card", ActionType::CompensationRequest)
        );

        let transition = workflow
            .next_step(&event("authorize_card", ActionType::Compensated))
            .unwrap();
        assert_eq!(
            continue_to(transition),
            ("create_order", ActionType::CompensationRequest)
        );

        let transition = workflow
            .next_step(&event("create_order", ActionType::Compensated))
            .unwrap();
        assert_eq!(transition, Transition::RolledBack);
    }

    #[test]
    fn test_scenario_failure_at_non_compensable_tail() {
        let workflow = workflow(&[
            ("create_order", true),
            ("verify_customer", false),
            ("authorize_card", false),
        ]);

        let transition = workflow
            .next_step(&event("authorize_card", ActionType::Failure))
            .unwrap();
        assert_eq!(
            continue_to(transition),
            ("create_order", ActionType::CompensationRequest)
        );
    }

    #[test]
    fn test_scenario_success_path() {
        let workflow = create_order_workflow();

        let transition = workflow
            .next_step(&event("create_order", ActionType::Success))
            .unwrap();
        assert_eq!(
            continue_to(transition),
            ("verify_customer", ActionType::Request)
        );

        let transition = workflow
            .next_step(&event("authorize_card", ActionType::Success))
            .unwrap();
        assert_eq!(transition, Transition::Completed);
    }

    #[test]
    fn test_builder_rejects_duplicate_steps() {
        let err = Workflow::builder("dup")
            .step(StepDefinition::new("a", "svc", empty_payload))
            .step(StepDefinition::new("a", "other", empty_payload))
            .build()
            .unwrap_err();
        assert!(matches!(err, SagaError::DuplicateStep(name) if name == "a"));
    }

    #[test]
    fn test_builder_rejects_dotted_workflow_name() {
        let err = Workflow::builder("create_order.v1")
            .step(StepDefinition::new("create_order", "order", empty_payload))
            .build()
            .unwrap_err();
        assert!(matches!(err, SagaError::InvalidName { name, .. } if name == "create_order.v1"));

        let err = Workflow::builder("").build().unwrap_err();
        assert!(matches!(err, SagaError::InvalidName { .. }));
    }

    #[test]
    fn test_built_event_types_round_trip() {
        let workflow = create_order_workflow();
        for step in workflow.steps().iter() {
            for action in ActionType::ALL {
                let event_type = EventType::new(workflow.name(), step.name(), action);
                let parsed: EventType = event_type.to_string().parse().unwrap();
                assert_eq!(parsed, event_type);
            }
        }
    }

    #[test]
    fn test_builder_rejects_dotted_step_name() {
        let err = Workflow::builder("create_order")
            .step(StepDefinition::new("create.order", "order", empty_payload))
            .build()
            .unwrap_err();
        assert!(matches!(err, SagaError::InvalidName { name, .. } if name == "create.order"));
    }

    #[test]
    fn test_builder_default_reply_destination() {
        let workflow = Workflow::builder("create_order").build().unwrap();
        assert_eq!(workflow.reply_destination(), "saga.create_order.response");
        assert!(!workflow.is_empty());
        assert!(Workflow::default().is_empty());
    }

    #[test]
    fn test_consumable_event_types() {
        let workflow = create_order_workflow();
        let types: Vec<String> = workflow
            .consumable_event_types()
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(types.len(), 9);
        assert!(types.contains(&"create_order.create_order.success".to_string()));
        assert!(types.contains(&"create_order.verify_customer.failure".to_string()));
        assert!(types.contains(&"create_order.authorize_card.compensated".to_string()));
        assert!(!types.iter().any(|t| t.ends_with(".request")));
    }
}

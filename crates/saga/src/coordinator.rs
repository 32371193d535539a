//! Saga coordinator driving executions from participant replies.

use std::sync::Arc;

use common::GlobalId;
use serde::Serialize;

use crate::action::ActionType;
use crate::error::{Result, SagaError};
use crate::execution::{Execution, INPUT_KEY, state_key};
use crate::message::Message;
use crate::publisher::Publisher;
use crate::repository::ExecutionRepository;
use crate::state::SagaState;
use crate::step::Step;
use crate::workflow::{Transition, Workflow};

/// Starts sagas and advances them one participant reply at a time.
///
/// Every state change is saved before the message it leads to is
/// published, so a crash between the two re-sends the message on
/// redelivery instead of losing it.
pub struct SagaCoordinator<R, P>
where
    R: ExecutionRepository,
    P: Publisher,
{
    repository: R,
    publisher: P,
}

impl<R, P> SagaCoordinator<R, P>
where
    R: ExecutionRepository,
    P: Publisher,
{
    /// Creates a new saga coordinator.
    pub fn new(repository: R, publisher: P) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Starts a new execution of `workflow` with `input`.
    ///
    /// Sends the first step's request and returns the execution's global
    /// ID. A workflow without steps completes immediately. If the first
    /// request cannot be built the execution is stored as rolled back and
    /// the build error is returned.
    #[tracing::instrument(skip(self, workflow, input), fields(workflow = %workflow.name()))]
    pub async fn start<I>(&self, workflow: Arc<Workflow>, input: &I) -> Result<GlobalId>
    where
        I: Serialize + Sync + ?Sized,
    {
        metrics::counter!("saga_started_total").increment(1);

        let mut execution = Execution::new(Arc::clone(&workflow));
        execution.set_state(INPUT_KEY, input)?;
        self.repository.save(&mut execution).await?;

        let Some(first) = workflow.steps().head() else {
            execution.set_status(SagaState::Completed);
            self.repository.save(&mut execution).await?;
            metrics::counter!("saga_completed_total").increment(1);
            tracing::info!(global_id = %execution.id(), "workflow has no steps, saga completed");
            return Ok(execution.id());
        };

        let request = match self.prepare(&mut execution, first, ActionType::Request) {
            Ok(request) => request,
            Err(err) => {
                // nothing was sent, so there is nothing to compensate
                execution.set_status(SagaState::RolledBack);
                if let Err(save_err) = self.repository.save(&mut execution).await {
                    tracing::error!(
                        global_id = %execution.id(),
                        error = %save_err,
                        "failed to record rejected start"
                    );
                }
                metrics::counter!("saga_start_rejected_total").increment(1);
                tracing::warn!(global_id = %execution.id(), error = %err, "saga start rejected");
                return Err(err);
            }
        };
        self.repository.save(&mut execution).await?;
        self.send(&first.request_destination(), &request).await?;

        tracing::info!(global_id = %execution.id(), step = first.name(), "saga started");
        Ok(execution.id())
    }

    /// Applies one participant reply to `execution`.
    ///
    /// The reply payload is checkpointed before the transition is decided.
    /// Returns the status the execution ends up in.
    #[tracing::instrument(
        skip(self, message, execution),
        fields(global_id = %message.global_id, event_type = %message.event_type)
    )]
    pub async fn process_message(
        &self,
        message: &Message,
        execution: &mut Execution,
    ) -> Result<SagaState> {
        let started = std::time::Instant::now();
        metrics::counter!("saga_messages_processed_total").increment(1);

        let event_type = &message.event_type;
        execution.set_state(
            state_key(&event_type.step_name, event_type.action),
            &message.event_data,
        )?;
        self.repository.save(execution).await?;

        let workflow = Arc::clone(execution.workflow());
        let transition = workflow.get_next_step(message)?;
        let status = SagaState::after(&transition);

        match transition {
            Transition::Continue { step, action } => {
                let outbound = self.prepare(execution, step, action)?;
                execution.set_status(status);
                self.repository.save(execution).await?;
                self.send(&step.request_destination(), &outbound).await?;
                tracing::info!(step = step.name(), %action, %status, "next step requested");
            }
            Transition::Completed => {
                execution.set_status(status);
                self.repository.save(execution).await?;
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!("saga completed");
            }
            Transition::RolledBack => {
                execution.set_status(status);
                self.repository.save(execution).await?;
                metrics::counter!("saga_rolled_back_total").increment(1);
                tracing::warn!("saga rolled back");
            }
        }

        metrics::histogram!("saga_message_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(status)
    }

    /// Loads an execution by its global ID.
    pub async fn get_execution(&self, id: GlobalId) -> Result<Option<Execution>> {
        self.repository.find(id).await
    }

    /// Builds the message for `action` on `step` and records its payload.
    fn prepare(
        &self,
        execution: &mut Execution,
        step: Step<'_>,
        action: ActionType,
    ) -> Result<Message> {
        let payload = step
            .build_payload(execution, action)
            .map_err(|err| match err {
                err @ SagaError::PayloadBuild { .. } => err,
                other => SagaError::payload_build(step.name(), other),
            })?;
        execution.set_state(state_key(step.name(), action), &payload)?;

        Ok(Message::new(
            execution.id(),
            execution.workflow(),
            &step,
            action,
            payload,
        ))
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.publisher.publish(destination, &bytes).await?;
        tracing::debug!(destination, event_id = %message.event_id, "message published");
        Ok(())
    }
}

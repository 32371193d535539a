//! Inbound message dispatch: decode, deduplicate, resolve and process.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::SagaCoordinator;
use crate::dedupe::{DEFAULT_DEDUPE_TTL, DedupKey, DeduplicationStore};
use crate::error::{Result, SagaError};
use crate::execution::Execution;
use crate::message::Message;
use crate::publisher::Publisher;
use crate::repository::{ExecutionRepository, WorkflowRegistry};
use crate::state::SagaState;

/// How an inbound message is matched to its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Routing {
    /// Resolve the workflow from the message's event type, then load the
    /// execution and require it to belong to that workflow.
    EventType,
    /// Load the execution by global ID and use whatever workflow it runs.
    #[default]
    Execution,
}

impl Routing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routing::EventType => "event_type",
            Routing::Execution => "execution",
        }
    }
}

impl FromStr for Routing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "event_type" => Ok(Routing::EventType),
            "execution" => Ok(Routing::Execution),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub routing: Routing,
    /// How long processed messages are remembered.
    pub dedupe_ttl: Duration,
    /// Where undeliverable messages go. Without one, orphans are dropped
    /// and structurally invalid messages are returned as errors.
    pub dead_letter_destination: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            routing: Routing::default(),
            dedupe_ttl: DEFAULT_DEDUPE_TTL,
            dead_letter_destination: None,
        }
    }
}

/// What became of a handled message. Every variant means "acknowledge".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied to its execution, leaving it in the given status.
    Processed(SagaState),
    /// Already processed earlier.
    Duplicate,
    /// No matching execution; dropped.
    Orphaned,
    /// Forwarded unchanged to the dead-letter destination.
    DeadLettered,
}

/// Handles raw inbound messages for the consume loop.
///
/// `Ok` means the message may be acknowledged, `Err` means it must be
/// redelivered.
pub struct MessageHandler<R, P, D>
where
    R: ExecutionRepository,
    P: Publisher,
    D: DeduplicationStore,
{
    registry: Arc<WorkflowRegistry>,
    coordinator: Arc<SagaCoordinator<R, P>>,
    dedupe: D,
    config: DispatchConfig,
}

impl<R, P, D> MessageHandler<R, P, D>
where
    R: ExecutionRepository,
    P: Publisher,
    D: DeduplicationStore,
{
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        coordinator: Arc<SagaCoordinator<R, P>>,
        dedupe: D,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            coordinator,
            dedupe,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Handles one raw message.
    #[tracing::instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn handle(&self, raw: &[u8]) -> Result<Disposition> {
        metrics::counter!("saga_messages_received_total").increment(1);

        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable message");
                return self.reject(raw, err).await;
            }
        };

        let key = DedupKey::for_message(&message)?;
        match self.dedupe.has(&key).await {
            Ok(true) => {
                metrics::counter!("saga_messages_duplicate_total").increment(1);
                tracing::debug!(%key, "duplicate message skipped");
                return Ok(Disposition::Duplicate);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, %key, "dedupe lookup failed, processing anyway");
            }
        }

        let Some(mut execution) = self.resolve(&message).await? else {
            metrics::counter!("saga_messages_orphaned_total").increment(1);
            tracing::warn!(
                global_id = %message.global_id,
                event_type = %message.event_type,
                "no execution for message"
            );
            return match &self.config.dead_letter_destination {
                Some(destination) => self.dead_letter(destination, raw).await,
                None => Ok(Disposition::Orphaned),
            };
        };

        match self
            .coordinator
            .process_message(&message, &mut execution)
            .await
        {
            Ok(status) => {
                if let Err(err) = self.dedupe.set(&key, self.config.dedupe_ttl).await {
                    tracing::error!(error = %err, %key, "failed to record processed message");
                }
                Ok(Disposition::Processed(status))
            }
            Err(err) if err.is_structural() => {
                tracing::warn!(error = %err, event_type = %message.event_type, "invalid message");
                self.reject(raw, err).await
            }
            Err(err) => {
                tracing::error!(error = %err, global_id = %message.global_id, "message processing failed");
                Err(err)
            }
        }
    }

    async fn resolve(&self, message: &Message) -> Result<Option<Execution>> {
        let execution = match self.coordinator.get_execution(message.global_id).await {
            Ok(execution) => execution,
            // stored under a workflow this process does not run
            Err(SagaError::WorkflowNotFound(workflow)) => {
                tracing::warn!(
                    global_id = %message.global_id,
                    %workflow,
                    "execution belongs to an unregistered workflow"
                );
                None
            }
            Err(err) => return Err(err),
        };
        match self.config.routing {
            Routing::Execution => Ok(execution),
            Routing::EventType => {
                let Some(workflow) = self.registry.for_event_type(&message.event_type) else {
                    return Ok(None);
                };
                Ok(execution.filter(|execution| execution.workflow().name() == workflow.name()))
            }
        }
    }

    /// Dead-letters `raw` if a destination is configured, otherwise
    /// returns `err`.
    async fn reject(&self, raw: &[u8], err: SagaError) -> Result<Disposition> {
        match &self.config.dead_letter_destination {
            Some(destination) => self.dead_letter(destination, raw).await,
            None => Err(err),
        }
    }

    async fn dead_letter(&self, destination: &str, raw: &[u8]) -> Result<Disposition> {
        self.coordinator.publisher().publish(destination, raw).await?;
        metrics::counter!("saga_messages_dead_lettered_total").increment(1);
        tracing::info!(destination, "message dead-lettered");
        Ok(Disposition::DeadLettered)
    }
}

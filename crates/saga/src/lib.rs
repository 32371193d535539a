//! Saga orchestration engine.
//!
//! A [`Workflow`] is an ordered list of steps, each owned by a participant
//! service and optionally compensable. The orchestrator sends a request to
//! one step at a time and waits for the participant's reply:
//!
//! - `success` moves on to the next step, or completes the saga
//! - `failure` starts compensating from the nearest compensable step at or
//!   before the failed one
//! - `compensated` keeps walking backwards until nothing is left to undo
//!
//! [`SagaCoordinator`] applies those transitions to a persisted
//! [`Execution`], [`MessageHandler`] turns raw inbound bytes into
//! coordinator calls with deduplication and dead-lettering, and
//! [`SagaConsumer`] runs the sequential consume loop.

pub mod action;
pub mod broker;
pub mod consumer;
pub mod coordinator;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod message;
pub mod postgres;
pub mod publisher;
pub mod repository;
pub mod state;
pub mod step;
pub mod workflow;

pub use action::ActionType;
pub use broker::{BrokerSubscription, InMemoryBroker};
pub use consumer::{Delivery, DeliveryHandler, MessageSource, SagaConsumer};
pub use coordinator::SagaCoordinator;
pub use dedupe::{DedupKey, DeduplicationStore, InMemoryDeduplicationStore};
pub use dispatch::{DispatchConfig, Disposition, MessageHandler, Routing};
pub use error::{Result, SagaError};
pub use execution::{Execution, ExecutionSnapshot, INPUT_KEY, Version, state_key};
pub use message::{EventData, EventType, Message, SagaReply};
pub use postgres::{PostgresDeduplicationStore, PostgresExecutionRepository};
pub use publisher::{InMemoryPublisher, Published, Publisher};
pub use repository::{
    ExecutionRepository, InMemoryExecutionRepository, WorkflowRegistry, WorkflowRepository,
};
pub use state::SagaState;
pub use step::{PayloadBuilder, Step, StepDefinition, StepTopology};
pub use workflow::{Transition, Workflow, WorkflowBuilder};

pub use common::{EventId, GlobalId};

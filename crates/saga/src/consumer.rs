//! The sequential consume loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::dedupe::DeduplicationStore;
use crate::dispatch::{Disposition, MessageHandler};
use crate::error::Result;
use crate::publisher::Publisher;
use crate::repository::ExecutionRepository;

/// One message handed out by a [`MessageSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn new(destination: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            destination: destination.into(),
            payload,
            attempt: 1,
        }
    }
}

/// A stream of deliveries with explicit acknowledgement.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next delivery. Returns None once the source is closed
    /// and drained.
    async fn recv(&mut self) -> Option<Delivery>;

    /// Acknowledges a delivery.
    async fn commit(&mut self, delivery: &Delivery) -> Result<()>;

    /// Hands a delivery back so it is received again.
    async fn redeliver(&mut self, delivery: Delivery) -> Result<()>;
}

/// Something that decides the fate of a raw delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, raw: &[u8]) -> Result<Disposition>;
}

#[async_trait]
impl<R, P, D> DeliveryHandler for MessageHandler<R, P, D>
where
    R: ExecutionRepository,
    P: Publisher,
    D: DeduplicationStore,
{
    async fn handle(&self, raw: &[u8]) -> Result<Disposition> {
        MessageHandler::handle(self, raw).await
    }
}

/// Default pause before a failed delivery is attempted again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Pulls deliveries one at a time and feeds them to a handler.
///
/// Messages are processed strictly in order. Shutdown is observed only
/// while waiting, never in the middle of a message.
pub struct SagaConsumer<H: DeliveryHandler> {
    handler: Arc<H>,
    retry_delay: Duration,
}

impl<H: DeliveryHandler> SagaConsumer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Runs until `shutdown` turns true, its sender is dropped, or the
    /// source closes.
    ///
    /// Handler errors on structurally invalid messages stop the loop and
    /// are returned; any other handler error redelivers the message.
    pub async fn run<S: MessageSource>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("consumer started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    tracing::info!("consumer shutting down");
                    break;
                }
                delivery = source.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        tracing::info!("message source closed");
                        break;
                    }
                },
            };

            match self.handler.handle(&delivery.payload).await {
                Ok(disposition) => {
                    source.commit(&delivery).await?;
                    tracing::debug!(
                        destination = %delivery.destination,
                        ?disposition,
                        "delivery committed"
                    );
                }
                Err(err) if err.is_structural() => {
                    tracing::error!(
                        error = %err,
                        destination = %delivery.destination,
                        "unprocessable message, stopping consumer"
                    );
                    return Err(err);
                }
                Err(err) => {
                    metrics::counter!("saga_messages_redelivered_total").increment(1);
                    tracing::warn!(
                        error = %err,
                        attempt = delivery.attempt,
                        "delivery failed, redelivering"
                    );
                    source.redeliver(delivery).await?;

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => {
                            tracing::info!("consumer shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        Ok(())
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // a dropped sender also ends the loop
    let _ = shutdown.wait_for(|stop| *stop).await;
}

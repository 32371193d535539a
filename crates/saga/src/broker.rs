//! In-process message broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::consumer::{Delivery, MessageSource};
use crate::error::{Result, SagaError};
use crate::message::Message;
use crate::publisher::{Published, Publisher};

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Delivery>>,
    published: Vec<Published>,
    committed: usize,
    closed: bool,
}

/// Destination-keyed FIFO queues shared by publishers and subscribers.
///
/// Subscribers of the same destination compete for its messages. Every
/// published message is also kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source receiving from `destinations`, checked in the
    /// given order.
    pub fn subscribe<I, S>(&self, destinations: I) -> BrokerSubscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BrokerSubscription {
            broker: self.clone(),
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    /// Stops accepting messages. Subscribers drain what is queued, then
    /// their `recv` returns None.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<Published> {
        self.state.lock().await.published.clone()
    }

    /// Messages published to `destination`, decoded.
    pub async fn messages_to(&self, destination: &str) -> Result<Vec<Message>> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|published| published.destination == destination)
            .map(Published::message)
            .collect()
    }

    /// Number of messages waiting on `destination`.
    pub async fn pending(&self, destination: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    /// Number of acknowledged deliveries across all subscriptions.
    pub async fn committed(&self) -> usize {
        self.state.lock().await.committed
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SagaError::Publish {
                destination: destination.to_string(),
                reason: "broker closed".to_string(),
            });
        }
        state.published.push(Published {
            destination: destination.to_string(),
            payload: payload.to_vec(),
        });
        state
            .queues
            .entry(destination.to_string())
            .or_default()
            .push_back(Delivery::new(destination, payload.to_vec()));
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }
}

/// A [`MessageSource`] over some of an [`InMemoryBroker`]'s destinations.
#[derive(Debug, Clone)]
pub struct BrokerSubscription {
    broker: InMemoryBroker,
    destinations: Vec<String>,
}

impl BrokerSubscription {
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }
}

#[async_trait]
impl MessageSource for BrokerSubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.broker.state.lock().await;
                for destination in &self.destinations {
                    if let Some(delivery) = state
                        .queues
                        .get_mut(destination)
                        .and_then(VecDeque::pop_front)
                    {
                        return Some(delivery);
                    }
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    async fn commit(&mut self, _delivery: &Delivery) -> Result<()> {
        self.broker.state.lock().await.committed += 1;
        Ok(())
    }

    async fn redeliver(&mut self, mut delivery: Delivery) -> Result<()> {
        delivery.attempt += 1;
        self.broker
            .state
            .lock()
            .await
            .queues
            .entry(delivery.destination.clone())
            .or_default()
            .push_front(delivery);
        self.broker.notify.notify_waiters();
        Ok(())
    }
}

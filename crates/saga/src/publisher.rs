//! Outbound message publishing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::message::Message;

/// Sends encoded messages to a named destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<()>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<()> {
        (**self).publish(destination, payload).await
    }
}

/// A message accepted by a publisher, as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub destination: String,
    pub payload: Vec<u8>,
}

impl Published {
    /// Decodes the payload as a saga message.
    pub fn message(&self) -> Result<Message> {
        Message::decode(&self.payload)
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<Published>,
    fail_on_publish: bool,
}

/// Publisher that records every message in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to reject every message.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<Published> {
        self.state.read().await.published.clone()
    }

    /// Messages published to `destination`, decoded.
    pub async fn messages_to(&self, destination: &str) -> Result<Vec<Message>> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|published| published.destination == destination)
            .map(Published::message)
            .collect()
    }

    /// Returns the number of published messages.
    pub async fn count(&self) -> usize {
        self.state.read().await.published.len()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, destination: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_publish {
            return Err(SagaError::Publish {
                destination: destination.to_string(),
                reason: "publisher unavailable".to_string(),
            });
        }
        state.published.push(Published {
            destination: destination.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let publisher = InMemoryPublisher::new();
        publisher.publish("service.order.request", b"one").await.unwrap();
        publisher.publish("service.customer.request", b"two").await.unwrap();

        let published = publisher.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].destination, "service.order.request");
        assert_eq!(published[1].payload, b"two".to_vec());
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let publisher = InMemoryPublisher::new();
        publisher.set_fail_on_publish(true).await;

        let err = publisher.publish("dest", b"x").await.unwrap_err();
        assert!(matches!(err, SagaError::Publish { destination, .. } if destination == "dest"));
        assert_eq!(publisher.count().await, 0);
    }

    #[tokio::test]
    async fn test_shared_through_arc() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let shared: Arc<dyn Publisher> = publisher.clone();
        shared.publish("dest", b"x").await.unwrap();
        assert_eq!(publisher.count().await, 1);
    }
}

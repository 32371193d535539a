//! Deduplication of redelivered messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{Result, SagaError};
use crate::message::Message;

/// Default time a processed message is remembered.
pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

/// Longest time a key is kept; longer TTLs are capped to this.
pub const MAX_DEDUPE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 10);

/// Caps `ttl` at [`MAX_DEDUPE_TTL`].
pub fn effective_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_DEDUPE_TTL)
}

/// Key identifying one fully processed message.
///
/// Built from the saga's global ID, the message's event ID and a hash of
/// its content, so a participant that reuses an event ID with a different
/// body is not mistaken for a redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn for_message(message: &Message) -> Result<Self> {
        Ok(Self(format!(
            "{}:{}:{}",
            message.global_id,
            message.event_id,
            message.content_hash()?
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store of processed-message keys with a bounded lifetime.
#[async_trait]
pub trait DeduplicationStore: Send + Sync {
    /// Returns true if `key` was recorded and has not expired.
    async fn has(&self, key: &DedupKey) -> Result<bool>;

    /// Records `key` for `ttl`.
    async fn set(&self, key: &DedupKey, ttl: Duration) -> Result<()>;
}

#[async_trait]
impl<D: DeduplicationStore + ?Sized> DeduplicationStore for Arc<D> {
    async fn has(&self, key: &DedupKey) -> Result<bool> {
        (**self).has(key).await
    }

    async fn set(&self, key: &DedupKey, ttl: Duration) -> Result<()> {
        (**self).set(key, ttl).await
    }
}

#[derive(Debug, Default)]
struct InMemoryDedupeState {
    entries: HashMap<DedupKey, Instant>,
    unavailable: bool,
}

/// In-memory deduplication store.
///
/// Expiry follows tokio's clock, so paused-time tests can advance past a TTL.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeduplicationStore {
    state: Arc<RwLock<InMemoryDedupeState>>,
}

impl InMemoryDeduplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail, simulating an unreachable store.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeduplicationStore for InMemoryDeduplicationStore {
    async fn has(&self, key: &DedupKey) -> Result<bool> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(SagaError::Deduplication("store unavailable".to_string()));
        }
        Ok(state
            .entries
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now()))
    }

    async fn set(&self, key: &DedupKey, ttl: Duration) -> Result<()> {
        let mut state = self.state.write().await;
        if state.unavailable {
            return Err(SagaError::Deduplication("store unavailable".to_string()));
        }
        let now = Instant::now();
        state.entries.retain(|_, expires_at| *expires_at > now);
        let expires_at = now
            .checked_add(effective_ttl(ttl))
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));
        state.entries.insert(key.clone(), expires_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::message::{EventData, EventType, SagaReply};
    use common::{EventId, GlobalId};

    fn message() -> Message {
        Message {
            global_id: GlobalId::new(),
            event_id: EventId::new(),
            event_type: EventType::new("create_order", "create_order", ActionType::Success),
            event_data: EventData::new(),
            saga: SagaReply {
                reply_channel: "saga.create_order.response".to_string(),
            },
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_key_shape() {
        let message = message();
        let key = DedupKey::for_message(&message).unwrap();
        let prefix = format!("{}:{}:", message.global_id, message.event_id);
        assert!(key.as_str().starts_with(&prefix));
        assert_eq!(key.as_str().len(), prefix.len() + 64);
    }

    #[test]
    fn test_key_changes_with_content() {
        let message = message();
        let mut altered = message.clone();
        altered
            .event_data
            .insert("order_id".to_string(), serde_json::json!("o-1"));

        assert_eq!(
            DedupKey::for_message(&message).unwrap(),
            DedupKey::for_message(&message.clone()).unwrap()
        );
        assert_ne!(
            DedupKey::for_message(&message).unwrap(),
            DedupKey::for_message(&altered).unwrap()
        );
    }

    #[tokio::test]
    async fn test_set_then_has() {
        let store = InMemoryDeduplicationStore::new();
        let key = DedupKey::for_message(&message()).unwrap();

        assert!(!store.has(&key).await.unwrap());
        store.set(&key, DEFAULT_DEDUPE_TTL).await.unwrap();
        assert!(store.has(&key).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_after_ttl() {
        let store = InMemoryDeduplicationStore::new();
        let key = DedupKey::for_message(&message()).unwrap();

        store.set(&key, Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.has(&key).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.has(&key).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_capped() {
        let store = InMemoryDeduplicationStore::new();
        let key = DedupKey::for_message(&message()).unwrap();

        store.set(&key, Duration::MAX).await.unwrap();
        assert!(store.has(&key).await.unwrap());
        assert_eq!(effective_ttl(Duration::MAX), MAX_DEDUPE_TTL);
        assert_eq!(effective_ttl(DEFAULT_DEDUPE_TTL), DEFAULT_DEDUPE_TTL);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryDeduplicationStore::new();
        store.set_unavailable(true).await;
        let key = DedupKey::for_message(&message()).unwrap();

        assert!(matches!(
            store.has(&key).await,
            Err(SagaError::Deduplication(_))
        ));
        assert!(store.set(&key, DEFAULT_DEDUPE_TTL).await.is_err());
    }
}

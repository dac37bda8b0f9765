//! Cache store backends
//!
//! Key-addressed, TTL-bound fast store of recent conversation state:
//! conversation snapshots, bounded message windows and classification
//! results. Entries are a derived projection of the durable store and
//! never authoritative.
//!
//! Every operation degrades to [`CacheError::Unavailable`] instead of
//! raising a fatal error, so the coordinator can fall back to the
//! durable store when the backend is down or slow. `RedisCache` is the
//! production backend; `MemoryCache` backs development and tests.

use crate::error::{CacheError, CacheResult};
use crate::types::{ConversationContext, Message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Cache store abstraction used by the memory coordinator.
#[async_trait]
pub trait ConversationCache: Send + Sync {
    /// Get a cached conversation snapshot.
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> CacheResult<Option<ConversationContext>>;

    /// Cache a conversation snapshot with a TTL.
    async fn set_conversation(
        &self,
        context: &ConversationContext,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Get up to `limit` recent messages, oldest first.
    ///
    /// `None` means the window is absent (or empty, which is treated the
    /// same way so callers repopulate from the store).
    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<Message>>>;

    /// Append a message to the sliding window, evicting the oldest entry
    /// once `window` is exceeded. Eviction is strictly by insertion
    /// order, never by access recency.
    async fn push_message(
        &self,
        conversation_id: &str,
        message: &Message,
        window: usize,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Cache a classification result under a message hash.
    async fn cache_classification(
        &self,
        message_hash: &str,
        classification: &Value,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Look up a cached classification by message hash.
    async fn get_cached_classification(&self, message_hash: &str) -> CacheResult<Option<Value>>;

    /// Drop the snapshot and message window for a conversation.
    async fn invalidate(&self, conversation_id: &str) -> CacheResult<()>;

    /// Health probe.
    async fn ping(&self) -> CacheResult<()>;
}

// ── Redis backend ───────────────────────────────────────────────────

/// Redis-backed conversation cache (for production).
///
/// Keys are prefixed to isolate from other Redis data. Snapshots use
/// `SETEX`; message windows use `LPUSH` + `LTRIM` + `EXPIRE`. Every
/// call, including connection acquisition, is bounded by a short
/// timeout so a slow cache never blocks the critical path.
pub struct RedisCache {
    client: redis::Client,
    /// Key prefix, e.g. `"parley:"`
    prefix: String,
    /// Per-operation timeout
    op_timeout: Duration,
}

impl RedisCache {
    /// Create a new Redis cache.
    pub fn new(redis_url: &str, op_timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            prefix: "parley:".to_string(),
            op_timeout,
        })
    }

    /// Create with a custom key prefix.
    pub fn with_prefix(redis_url: &str, prefix: &str, op_timeout: Duration) -> CacheResult<Self> {
        let mut cache = Self::new(redis_url, op_timeout)?;
        cache.prefix = prefix.to_string();
        Ok(cache)
    }

    fn conversation_key(&self, conversation_id: &str) -> String {
        format!("{}conv:{}", self.prefix, conversation_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}messages:{}", self.prefix, conversation_id)
    }

    fn classification_key(&self, message_hash: &str) -> String {
        format!("{}classification:{}", self.prefix, message_hash)
    }

    async fn connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        match tokio::time::timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::Unavailable(format!("redis connect: {e}"))),
            Err(_) => Err(CacheError::Unavailable("redis connect timed out".into())),
        }
    }

    async fn run<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(format!("redis: {e}"))),
            Err(_) => Err(CacheError::Unavailable("redis operation timed out".into())),
        }
    }
}

#[async_trait]
impl ConversationCache for RedisCache {
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> CacheResult<Option<ConversationContext>> {
        let mut conn = self.connection().await?;
        let key = self.conversation_key(conversation_id);
        let data: Option<String> = self
            .run(redis::cmd("GET").arg(&key).query_async(&mut conn))
            .await?;
        match data {
            Some(json) => {
                let context = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Unavailable(format!("corrupt cache entry: {e}")))?;
                debug!(conversation_id, "conversation snapshot served from cache");
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    async fn set_conversation(
        &self,
        context: &ConversationContext,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.conversation_key(&context.conversation.id);
        let json = serde_json::to_string(context)
            .map_err(|e| CacheError::Unavailable(format!("serialize snapshot: {e}")))?;
        self.run(
            redis::cmd("SETEX")
                .arg(&key)
                .arg(ttl.as_secs())
                .arg(&json)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<Message>>> {
        let mut conn = self.connection().await?;
        let key = self.messages_key(conversation_id);
        let raw: Vec<String> = self
            .run(
                redis::cmd("LRANGE")
                    .arg(&key)
                    .arg(0)
                    .arg(limit as isize - 1)
                    .query_async(&mut conn),
            )
            .await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let mut messages = Vec::with_capacity(raw.len());
        for json in &raw {
            let message: Message = serde_json::from_str(json)
                .map_err(|e| CacheError::Unavailable(format!("corrupt window entry: {e}")))?;
            messages.push(message);
        }
        // LPUSH stores newest at the head; callers want chronological order.
        messages.reverse();
        Ok(Some(messages))
    }

    async fn push_message(
        &self,
        conversation_id: &str,
        message: &Message,
        window: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.messages_key(conversation_id);
        let json = serde_json::to_string(message)
            .map_err(|e| CacheError::Unavailable(format!("serialize message: {e}")))?;
        let mut pipe = redis::pipe();
        pipe.cmd("LPUSH").arg(&key).arg(&json).ignore();
        pipe.cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(window as isize - 1)
            .ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(ttl.as_secs()).ignore();
        self.run(pipe.query_async::<()>(&mut conn)).await
    }

    async fn cache_classification(
        &self,
        message_hash: &str,
        classification: &Value,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.classification_key(message_hash);
        let json = serde_json::to_string(classification)
            .map_err(|e| CacheError::Unavailable(format!("serialize classification: {e}")))?;
        self.run(
            redis::cmd("SETEX")
                .arg(&key)
                .arg(ttl.as_secs())
                .arg(&json)
                .query_async::<()>(&mut conn),
        )
        .await
    }

    async fn get_cached_classification(&self, message_hash: &str) -> CacheResult<Option<Value>> {
        let mut conn = self.connection().await?;
        let key = self.classification_key(message_hash);
        let data: Option<String> = self
            .run(redis::cmd("GET").arg(&key).query_async(&mut conn))
            .await?;
        match data {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Unavailable(format!("corrupt cache entry: {e}"))),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, conversation_id: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let conv_key = self.conversation_key(conversation_id);
        let msg_key = self.messages_key(conversation_id);
        self.run(
            redis::cmd("DEL")
                .arg(&conv_key)
                .arg(&msg_key)
                .query_async::<()>(&mut conn),
        )
        .await?;
        debug!(conversation_id, "cache entries invalidated");
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.run(redis::cmd("PING").query_async::<()>(&mut conn))
            .await
    }
}

// ── In-memory backend ───────────────────────────────────────────────

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory conversation cache (for development and tests).
///
/// Same semantics as `RedisCache`, including TTL expiry and sliding
/// windows, without persistence or cross-process sharing.
#[derive(Default)]
pub struct MemoryCache {
    conversations: RwLock<HashMap<String, Expiring<ConversationContext>>>,
    /// Windows store newest first, mirroring the Redis list layout.
    windows: RwLock<HashMap<String, Expiring<Vec<Message>>>>,
    classifications: RwLock<HashMap<String, Expiring<Value>>>,
}

impl MemoryCache {
    /// Create an empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create behind an `Arc`, the shape the coordinator wants.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ConversationCache for MemoryCache {
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> CacheResult<Option<ConversationContext>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn set_conversation(
        &self,
        context: &ConversationContext,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(
            context.conversation.id.clone(),
            Expiring::new(context.clone(), ttl),
        );
        Ok(())
    }

    async fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> CacheResult<Option<Vec<Message>>> {
        let windows = self.windows.read().await;
        let Some(entry) = windows.get(conversation_id).filter(|e| !e.expired()) else {
            return Ok(None);
        };
        if entry.value.is_empty() {
            return Ok(None);
        }
        let mut messages: Vec<Message> = entry.value.iter().take(limit).cloned().collect();
        messages.reverse();
        Ok(Some(messages))
    }

    async fn push_message(
        &self,
        conversation_id: &str,
        message: &Message,
        window: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut windows = self.windows.write().await;
        let entry = windows
            .entry(conversation_id.to_string())
            .or_insert_with(|| Expiring::new(Vec::new(), ttl));
        if entry.expired() {
            entry.value.clear();
        }
        entry.value.insert(0, message.clone());
        entry.value.truncate(window);
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn cache_classification(
        &self,
        message_hash: &str,
        classification: &Value,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut classifications = self.classifications.write().await;
        classifications.insert(
            message_hash.to_string(),
            Expiring::new(classification.clone(), ttl),
        );
        Ok(())
    }

    async fn get_cached_classification(&self, message_hash: &str) -> CacheResult<Option<Value>> {
        let classifications = self.classifications.read().await;
        Ok(classifications
            .get(message_hash)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn invalidate(&self, conversation_id: &str) -> CacheResult<()> {
        self.conversations.write().await.remove(conversation_id);
        self.windows.write().await.remove(conversation_id);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Conversation, ConversationStatus, MessageRole};
    use chrono::Utc;

    fn sample_context(id: &str) -> ConversationContext {
        let now = Utc::now();
        ConversationContext::new(Conversation {
            id: id.to_string(),
            customer_id: "cust-1".into(),
            status: ConversationStatus::Open,
            priority: None,
            category: None,
            escalated: false,
            human_agent_id: None,
            message_count: 0,
            version: 1,
            customer_context: serde_json::json!({}),
            classification_history: Vec::new(),
            articles_referenced: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        })
    }

    fn sample_message(conversation_id: &str, content: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: MessageRole::User,
            content: content.to_string(),
            classification: None,
            processing_time_ms: None,
            created_at: Utc::now(),
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn snapshot_round_trip() {
        let cache = MemoryCache::new();
        assert!(cache.get_conversation("c1").await.unwrap().is_none());

        cache
            .set_conversation(&sample_context("c1"), TTL)
            .await
            .unwrap();
        let loaded = cache.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(loaded.conversation.id, "c1");
    }

    #[tokio::test]
    async fn snapshot_expires() {
        let cache = MemoryCache::new();
        cache
            .set_conversation(&sample_context("c1"), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get_conversation("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_slides_by_insertion_order() {
        let cache = MemoryCache::new();
        for i in 0..7 {
            cache
                .push_message("c1", &sample_message("c1", &format!("m{i}")), 5, TTL)
                .await
                .unwrap();
        }
        let messages = cache.get_recent_messages("c1", 10).await.unwrap().unwrap();
        // Oldest two evicted, remainder in chronological order.
        assert_eq!(messages.len(), 5);
        assert_eq!(messages.first().unwrap().content, "m2");
        assert_eq!(messages.last().unwrap().content, "m6");
    }

    #[tokio::test]
    async fn window_limit_returns_newest() {
        let cache = MemoryCache::new();
        for i in 0..4 {
            cache
                .push_message("c1", &sample_message("c1", &format!("m{i}")), 10, TTL)
                .await
                .unwrap();
        }
        let messages = cache.get_recent_messages("c1", 2).await.unwrap().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[1].content, "m3");
    }

    #[tokio::test]
    async fn invalidate_drops_snapshot_and_window() {
        let cache = MemoryCache::new();
        cache
            .set_conversation(&sample_context("c1"), TTL)
            .await
            .unwrap();
        cache
            .push_message("c1", &sample_message("c1", "hello"), 10, TTL)
            .await
            .unwrap();

        cache.invalidate("c1").await.unwrap();
        assert!(cache.get_conversation("c1").await.unwrap().is_none());
        assert!(cache.get_recent_messages("c1", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn classification_round_trip() {
        let cache = MemoryCache::new();
        let classification = serde_json::json!({"category": "billing", "priority": "high"});
        cache
            .cache_classification("abc123", &classification, TTL)
            .await
            .unwrap();
        let loaded = cache.get_cached_classification("abc123").await.unwrap();
        assert_eq!(loaded, Some(classification));
        assert!(cache
            .get_cached_classification("missing")
            .await
            .unwrap()
            .is_none());
    }
}

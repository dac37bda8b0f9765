//! Memory coordinator — cache-aside orchestration over the durable store.
//!
//! The coordinator is the single authority reconciling the cache and
//! the durable store: reads check the cache first and repopulate it on
//! miss; writes go through the store (under the optimistic version
//! guard) and then update the cache. Cache failures are absorbed here
//! and logged; they never fail a request while the store is reachable.

use crate::cache::ConversationCache;
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::store::ConversationStore;
use crate::types::{
    ArticleUsage, Conversation, ConversationContext, ConversationStatus, ConversationSummary,
    InteractionMetadata, Message, NewMessage,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Health of the two storage tiers.
#[derive(Debug, Clone, Copy)]
pub struct MemoryHealth {
    /// Durable store reachable
    pub store_ok: bool,
    /// Cache backend reachable
    pub cache_ok: bool,
}

/// Cache-aside coordinator for conversation state.
///
/// Owns the consistency protocol between the cache store and the
/// durable store; no other component may write either directly.
pub struct ConversationMemory {
    store: ConversationStore,
    cache: Arc<dyn ConversationCache>,
    config: MemoryConfig,
}

impl ConversationMemory {
    /// Create a coordinator over the given store and cache.
    pub fn new(
        store: ConversationStore,
        cache: Arc<dyn ConversationCache>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Get the conversation context, cache first.
    ///
    /// On a cache miss (or an unavailable cache) the durable store is
    /// read and the cache repopulated best-effort. `NotFound` means the
    /// conversation does not exist anywhere.
    pub async fn get_context(&self, conversation_id: &str) -> Result<ConversationContext> {
        match self.cache.get_conversation(conversation_id).await {
            Ok(Some(context)) => {
                debug!(conversation_id, "context cache hit");
                return Ok(context);
            }
            Ok(None) => {}
            Err(e) => warn!(conversation_id, error = %e, "context cache read degraded"),
        }

        let conversation = self.store.get_conversation(conversation_id).await?;
        let context = ConversationContext::new(conversation);
        if let Err(e) = self
            .cache
            .set_conversation(&context, self.config.conversation_ttl())
            .await
        {
            warn!(conversation_id, error = %e, "context cache repopulation failed");
        }
        Ok(context)
    }

    /// Recent message history, cache window first with store fallback.
    pub async fn get_history(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        match self.cache.get_recent_messages(conversation_id, limit).await {
            Ok(Some(messages)) => {
                debug!(conversation_id, count = messages.len(), "history cache hit");
                return Ok(messages);
            }
            Ok(None) => {}
            Err(e) => warn!(conversation_id, error = %e, "history cache read degraded"),
        }

        let messages = self
            .store
            .get_messages(conversation_id, limit, None)
            .await?;
        let ttl = self.config.conversation_ttl();
        for message in &messages {
            if let Err(e) = self
                .cache
                .push_message(
                    conversation_id,
                    message,
                    self.config.message_window,
                    ttl,
                )
                .await
            {
                warn!(conversation_id, error = %e, "history cache repopulation aborted");
                break;
            }
        }
        Ok(messages)
    }

    /// Read-only pagination over the full message history.
    ///
    /// Always served from the durable store; `before` is the restartable
    /// cursor (the `created_at` of the oldest message already seen).
    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        self.store.get_messages(conversation_id, limit, before).await
    }

    /// Recent conversations for a customer, newest first.
    pub async fn customer_history(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        self.store
            .list_customer_conversations(customer_id, limit)
            .await
    }

    // ── Writes ──────────────────────────────────────────────────

    /// Record a complete user/agent interaction, write-through.
    ///
    /// Appends both messages to the durable store under
    /// `expected_version`. A `VersionConflict` propagates untouched:
    /// it is expected under concurrent multi-turn access and the caller
    /// must re-fetch context and retry the whole interaction (or use
    /// [`Self::record_interaction_with_retry`]). Cache updates after a
    /// successful append are best-effort.
    pub async fn record_interaction(
        &self,
        conversation_id: &str,
        expected_version: i64,
        user_message: NewMessage,
        agent_message: NewMessage,
        metadata: Option<&InteractionMetadata>,
    ) -> Result<ConversationContext> {
        self.write_through(
            conversation_id,
            expected_version,
            &[user_message, agent_message],
            metadata,
        )
        .await
    }

    /// [`Self::record_interaction`] wrapped in the bounded conflict
    /// retry loop from the concurrency model: re-read the current
    /// version and retry until the configured bound, then surface
    /// `ConflictRetriesExhausted`.
    pub async fn record_interaction_with_retry(
        &self,
        conversation_id: &str,
        user_message: NewMessage,
        agent_message: NewMessage,
        metadata: Option<&InteractionMetadata>,
    ) -> Result<ConversationContext> {
        let messages = [user_message, agent_message];
        self.write_through_with_retry(conversation_id, &messages, metadata)
            .await
    }

    /// Check for an existing active conversation for the customer, or
    /// create one. Returns the context and whether it is new.
    ///
    /// The lookup goes to the durable store, never the cache, so a cache
    /// miss can not create a duplicate conversation.
    pub async fn start_or_get_conversation(
        &self,
        customer_id: &str,
        first_message: &str,
        customer_context: Value,
    ) -> Result<(ConversationContext, bool)> {
        if let Some(existing) = self
            .store
            .find_recent_active(customer_id, self.config.active_window())
            .await?
        {
            debug!(
                customer_id,
                conversation_id = %existing.id,
                "continuing recent active conversation"
            );
            let context = self
                .write_through_with_retry(
                    &existing.id,
                    &[NewMessage::user(first_message)],
                    None,
                )
                .await?;
            return Ok((context, false));
        }

        let conversation = self
            .store
            .create_conversation(customer_id, customer_context)
            .await?;
        debug!(customer_id, conversation_id = %conversation.id, "conversation created");
        let context = self
            .write_through(
                &conversation.id,
                conversation.version,
                &[NewMessage::user(first_message)],
                None,
            )
            .await?;
        Ok((context, true))
    }

    /// Update the conversation status and invalidate its cache entries.
    pub async fn update_status(
        &self,
        conversation_id: &str,
        expected_version: i64,
        status: ConversationStatus,
        human_agent_id: Option<&str>,
    ) -> Result<ConversationContext> {
        let conversation = self
            .store
            .update_status(conversation_id, expected_version, status, human_agent_id)
            .await?;
        if let Err(e) = self.cache.invalidate(conversation_id).await {
            warn!(conversation_id, error = %e, "cache invalidation failed");
        }
        Ok(ConversationContext::new(conversation))
    }

    // ── Classification cache ────────────────────────────────────

    /// Look up a cached classification for a message text. Cache
    /// failures degrade to a miss.
    pub async fn cached_classification(&self, message: &str) -> Option<Value> {
        let hash = message_hash(message);
        match self.cache.get_cached_classification(&hash).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "classification cache read degraded");
                None
            }
        }
    }

    /// Cache a classification result for a message text, best-effort.
    pub async fn cache_classification(&self, message: &str, classification: &Value) {
        let hash = message_hash(message);
        if let Err(e) = self
            .cache
            .cache_classification(&hash, classification, self.config.classification_ttl())
            .await
        {
            warn!(error = %e, "classification cache write failed");
        }
    }

    // ── Maintenance passthroughs ────────────────────────────────

    /// Persist a conversation summary.
    pub async fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        self.store.save_summary(summary).await
    }

    /// Fetch the stored summary for a conversation, if any.
    pub async fn get_summary(&self, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        self.store.get_summary(conversation_id).await
    }

    /// Record knowledge-article usage outside an interaction.
    pub async fn record_article_usage(
        &self,
        conversation_id: &str,
        articles: &[ArticleUsage],
    ) -> Result<()> {
        self.store
            .record_article_usage(conversation_id, articles)
            .await
    }

    /// Archive resolved conversations older than the cutoff. Returns the
    /// number archived.
    pub async fn archive_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store.archive_resolved_before(cutoff).await
    }

    /// Probe both tiers.
    pub async fn health(&self) -> MemoryHealth {
        MemoryHealth {
            store_ok: self.store.ping().await.is_ok(),
            cache_ok: self.cache.ping().await.is_ok(),
        }
    }

    // ── Internals ───────────────────────────────────────────────

    /// Append messages durably, then update the cached window and
    /// snapshot. The append is authoritative; cache failures downgrade
    /// to an invalidation so a stale window is dropped, not served.
    async fn write_through(
        &self,
        conversation_id: &str,
        expected_version: i64,
        messages: &[NewMessage],
        metadata: Option<&InteractionMetadata>,
    ) -> Result<ConversationContext> {
        let (conversation, stored) = self
            .store
            .append_messages(conversation_id, expected_version, messages, metadata)
            .await?;

        let ttl = self.config.conversation_ttl();
        for message in &stored {
            if let Err(e) = self
                .cache
                .push_message(conversation_id, message, self.config.message_window, ttl)
                .await
            {
                warn!(conversation_id, error = %e, "window cache update failed, invalidating");
                if let Err(e) = self.cache.invalidate(conversation_id).await {
                    warn!(conversation_id, error = %e, "cache invalidation failed");
                }
                break;
            }
        }

        let context = ConversationContext::new(conversation);
        if let Err(e) = self.cache.set_conversation(&context, ttl).await {
            warn!(conversation_id, error = %e, "snapshot cache update failed");
        }
        Ok(context)
    }

    async fn write_through_with_retry(
        &self,
        conversation_id: &str,
        messages: &[NewMessage],
        metadata: Option<&InteractionMetadata>,
    ) -> Result<ConversationContext> {
        let mut attempts = 0;
        loop {
            // The version must come from the store, not the cache: a
            // cached snapshot may be exactly the stale state that caused
            // the conflict.
            let current = self.store.get_conversation(conversation_id).await?;
            match self
                .write_through(conversation_id, current.version, messages, metadata)
                .await
            {
                Err(MemoryError::VersionConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.config.conflict_retries {
                        return Err(MemoryError::ConflictRetriesExhausted {
                            conversation_id: conversation_id.to_string(),
                            attempts,
                        });
                    }
                    debug!(conversation_id, attempts, "version conflict, retrying write");
                }
                other => return other,
            }
        }
    }
}

/// Stable hash for classification cache keys.
fn message_hash(message: &str) -> String {
    format!("{:x}", Sha256::digest(message.as_bytes()))
}

#[cfg(test)]
mod tests;

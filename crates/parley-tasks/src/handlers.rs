//! Built-in task handlers for deferred support work.
//!
//! Handlers read and write conversation state only through the memory
//! coordinator and talk to the outside world (notification delivery,
//! summarization, the knowledge index) through collaborator traits, so
//! the task layer stays free of transport and model concerns. All four
//! are idempotent: redelivering a task produces the same durable effect
//! as delivering it once.

use crate::error::{Result, TaskError};
use crate::types::{
    EscalationPayload, PurgePayload, RefreshIndexPayload, SummaryPayload, TaskKind,
};
use crate::worker::{HandlerRegistry, TaskHandler};
use async_trait::async_trait;
use chrono::Utc;
use parley_memory::{
    CollaboratorError, ConversationContext, ConversationMemory, ConversationSummary, Message,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

// ── Collaborator seams ──────────────────────────────────────────────

/// Escalation notice delivered to human agents.
#[derive(Debug, Clone)]
pub struct EscalationNotice {
    /// Escalated conversation
    pub conversation_id: String,
    /// Affected customer
    pub customer_id: String,
    /// Priority of the escalation
    pub priority: String,
    /// Category, when classified
    pub category: Option<String>,
    /// How long the conversation has been running
    pub duration_minutes: f64,
}

/// Delivery channel for escalation notices (email, chat, pager).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the notice to the support team.
    async fn notify_escalation(
        &self,
        notice: &EscalationNotice,
    ) -> std::result::Result<(), CollaboratorError>;
}

/// Notifier that only logs, for deployments without a delivery channel
/// wired up yet.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_escalation(
        &self,
        notice: &EscalationNotice,
    ) -> std::result::Result<(), CollaboratorError> {
        info!(
            conversation_id = %notice.conversation_id,
            customer_id = %notice.customer_id,
            priority = %notice.priority,
            category = notice.category.as_deref().unwrap_or("unknown"),
            duration_minutes = %format!("{:.1}", notice.duration_minutes),
            "escalated conversation requires human attention"
        );
        Ok(())
    }
}

/// Produces a conversation summary (typically an LLM call).
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the conversation from its history and context.
    async fn summarize(
        &self,
        history: &[Message],
        context: &ConversationContext,
    ) -> std::result::Result<String, CollaboratorError>;
}

/// Knowledge-article index maintenance seam.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Refresh the index; an empty slice means a full rebuild. Returns
    /// the number of articles processed.
    async fn refresh(&self, article_ids: &[String])
        -> std::result::Result<usize, CollaboratorError>;
}

fn collaborator_err(e: CollaboratorError) -> TaskError {
    TaskError::Execution(e.to_string())
}

// ── Handlers ────────────────────────────────────────────────────────

/// Notifies human agents about an escalated conversation.
pub struct NotifyEscalationHandler {
    memory: Arc<ConversationMemory>,
    notifier: Arc<dyn Notifier>,
}

impl NotifyEscalationHandler {
    /// Create the handler.
    pub fn new(memory: Arc<ConversationMemory>, notifier: Arc<dyn Notifier>) -> Self {
        Self { memory, notifier }
    }
}

#[async_trait]
impl TaskHandler for NotifyEscalationHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::NotifyEscalation
    }

    async fn run(&self, payload: Value) -> Result<Value> {
        let payload: EscalationPayload = serde_json::from_value(payload)?;
        let context = self.memory.get_context(&payload.conversation_id).await?;

        let notice = EscalationNotice {
            conversation_id: payload.conversation_id.clone(),
            customer_id: payload.customer_id,
            priority: payload.priority,
            category: context.conversation.category.clone(),
            duration_minutes: context.duration_minutes,
        };
        self.notifier
            .notify_escalation(&notice)
            .await
            .map_err(collaborator_err)?;

        Ok(json!({
            "status": "sent",
            "conversation_id": payload.conversation_id,
        }))
    }
}

/// Generates and stores a conversation summary.
pub struct GenerateSummaryHandler {
    memory: Arc<ConversationMemory>,
    summarizer: Arc<dyn Summarizer>,
    /// How much history feeds the summary
    history_limit: usize,
}

impl GenerateSummaryHandler {
    /// Create the handler.
    pub fn new(memory: Arc<ConversationMemory>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            memory,
            summarizer,
            history_limit: 100,
        }
    }
}

#[async_trait]
impl TaskHandler for GenerateSummaryHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::GenerateSummary
    }

    async fn run(&self, payload: Value) -> Result<Value> {
        let payload: SummaryPayload = serde_json::from_value(payload)?;
        let history = self
            .memory
            .get_history(&payload.conversation_id, self.history_limit)
            .await?;
        let context = self.memory.get_context(&payload.conversation_id).await?;

        let summary_text = self
            .summarizer
            .summarize(&history, &context)
            .await
            .map_err(collaborator_err)?;

        // Upsert keyed by conversation, so redelivery overwrites rather
        // than duplicating.
        self.memory
            .save_summary(&ConversationSummary {
                conversation_id: payload.conversation_id.clone(),
                summary: summary_text.clone(),
                message_count: context.conversation.message_count,
                category: context.conversation.category.clone(),
                generated_at: Utc::now(),
            })
            .await?;

        Ok(json!({
            "conversation_id": payload.conversation_id,
            "summary_chars": summary_text.len(),
        }))
    }
}

/// Refreshes the knowledge-article index.
pub struct RefreshIndexHandler {
    index: Arc<dyn KnowledgeIndex>,
}

impl RefreshIndexHandler {
    /// Create the handler.
    pub fn new(index: Arc<dyn KnowledgeIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl TaskHandler for RefreshIndexHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::RefreshIndex
    }

    async fn run(&self, payload: Value) -> Result<Value> {
        let payload: RefreshIndexPayload = serde_json::from_value(payload)?;
        let processed = self
            .index
            .refresh(&payload.article_ids)
            .await
            .map_err(collaborator_err)?;
        info!(processed, "knowledge index refreshed");
        Ok(json!({ "articles_processed": processed }))
    }
}

/// Archives resolved conversations past the age threshold.
pub struct PurgeOldConversationsHandler {
    memory: Arc<ConversationMemory>,
}

impl PurgeOldConversationsHandler {
    /// Create the handler.
    pub fn new(memory: Arc<ConversationMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl TaskHandler for PurgeOldConversationsHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::PurgeOldConversations
    }

    async fn run(&self, payload: Value) -> Result<Value> {
        let payload: PurgePayload = serde_json::from_value(payload)?;
        let cutoff = Utc::now() - chrono::Duration::days(payload.days_old);
        let archived = self.memory.archive_resolved_before(cutoff).await?;
        info!(archived, days_old = payload.days_old, "old conversations archived");
        Ok(json!({ "archived": archived }))
    }
}

/// Wire all built-in handlers into a registry, ready for the worker
/// pool.
pub fn builtin_registry(
    memory: Arc<ConversationMemory>,
    notifier: Arc<dyn Notifier>,
    summarizer: Arc<dyn Summarizer>,
    index: Arc<dyn KnowledgeIndex>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(NotifyEscalationHandler::new(
        memory.clone(),
        notifier,
    )));
    registry.register(Arc::new(GenerateSummaryHandler::new(
        memory.clone(),
        summarizer,
    )));
    registry.register(Arc::new(RefreshIndexHandler::new(index)));
    registry.register(Arc::new(PurgeOldConversationsHandler::new(memory)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_memory::{
        ConversationStatus, ConversationStore, MemoryCache, MemoryConfig, MemoryError,
    };
    use std::sync::Mutex;

    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(
            &self,
            history: &[Message],
            context: &ConversationContext,
        ) -> std::result::Result<String, CollaboratorError> {
            Ok(format!(
                "{} messages about {}",
                history.len(),
                context.conversation.category.as_deref().unwrap_or("general")
            ))
        }
    }

    struct RecordingNotifier {
        notices: Mutex<Vec<EscalationNotice>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_escalation(
            &self,
            notice: &EscalationNotice,
        ) -> std::result::Result<(), CollaboratorError> {
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    struct CountingIndex;

    #[async_trait]
    impl KnowledgeIndex for CountingIndex {
        async fn refresh(
            &self,
            article_ids: &[String],
        ) -> std::result::Result<usize, CollaboratorError> {
            Ok(article_ids.len())
        }
    }

    async fn memory() -> Arc<ConversationMemory> {
        let store = ConversationStore::in_memory().await.unwrap();
        Arc::new(ConversationMemory::new(
            store,
            MemoryCache::shared(),
            MemoryConfig::default(),
        ))
    }

    #[tokio::test]
    async fn escalation_handler_delivers_notice() {
        let memory = memory().await;
        let (context, _) = memory
            .start_or_get_conversation("cust-1", "everything is broken", serde_json::json!({}))
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier {
            notices: Mutex::new(Vec::new()),
        });
        let handler = NotifyEscalationHandler::new(memory, notifier.clone());

        let result = handler
            .run(json!({
                "conversation_id": context.conversation.id,
                "customer_id": "cust-1",
                "priority": "urgent",
            }))
            .await
            .unwrap();
        assert_eq!(result["status"], "sent");

        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].priority, "urgent");
    }

    #[tokio::test]
    async fn escalation_handler_surfaces_missing_conversation() {
        let memory = memory().await;
        let handler = NotifyEscalationHandler::new(memory, Arc::new(LogNotifier));

        let err = handler
            .run(json!({
                "conversation_id": "ghost",
                "customer_id": "cust-1",
                "priority": "high",
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Memory(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn summary_handler_persists_upsert() {
        let memory = memory().await;
        let (context, _) = memory
            .start_or_get_conversation("cust-1", "billing question", serde_json::json!({}))
            .await
            .unwrap();
        let id = context.conversation.id.clone();

        let handler = GenerateSummaryHandler::new(memory.clone(), Arc::new(StubSummarizer));
        let payload = json!({ "conversation_id": id });

        handler.run(payload.clone()).await.unwrap();
        let first = memory.get_summary(&id).await.unwrap().unwrap();

        // Redelivery overwrites in place.
        handler.run(payload).await.unwrap();
        let second = memory.get_summary(&id).await.unwrap().unwrap();
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.conversation_id, second.conversation_id);
    }

    #[tokio::test]
    async fn refresh_handler_reports_processed_count() {
        let handler = RefreshIndexHandler::new(Arc::new(CountingIndex));
        let result = handler
            .run(json!({ "article_ids": ["kb-1", "kb-2", "kb-3"] }))
            .await
            .unwrap();
        assert_eq!(result["articles_processed"], 3);

        // Missing field defaults to a full refresh.
        let result = handler.run(json!({})).await.unwrap();
        assert_eq!(result["articles_processed"], 0);
    }

    #[tokio::test]
    async fn purge_handler_archives_and_is_idempotent() {
        let memory = memory().await;
        let (context, _) = memory
            .start_or_get_conversation("cust-1", "old issue", serde_json::json!({}))
            .await
            .unwrap();
        memory
            .update_status(
                &context.conversation.id,
                context.conversation.version,
                ConversationStatus::Resolved,
                None,
            )
            .await
            .unwrap();

        let handler = PurgeOldConversationsHandler::new(memory.clone());

        // days_old = 0 puts the cutoff at "now", past the fresh resolved_at.
        let result = handler.run(json!({ "days_old": 0 })).await.unwrap();
        assert_eq!(result["archived"], 1);

        // Second delivery finds nothing left to archive.
        let result = handler.run(json!({ "days_old": 0 })).await.unwrap();
        assert_eq!(result["archived"], 0);

        let archived = memory.get_context(&context.conversation.id).await.unwrap();
        assert_eq!(archived.conversation.status, ConversationStatus::Archived);
    }

    #[tokio::test]
    async fn builtin_registry_covers_all_kinds() {
        let memory = memory().await;
        let registry = builtin_registry(
            memory,
            Arc::new(LogNotifier),
            Arc::new(StubSummarizer),
            Arc::new(CountingIndex),
        );
        for kind in [
            TaskKind::NotifyEscalation,
            TaskKind::GenerateSummary,
            TaskKind::RefreshIndex,
            TaskKind::PurgeOldConversations,
        ] {
            assert!(registry.get(kind).is_some(), "missing handler for {kind}");
        }
    }
}

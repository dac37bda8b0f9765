use super::ConversationStore;
use crate::error::{MemoryError, Result};
use crate::types::{
    ArticleUsage, ClassificationRecord, Conversation, ConversationStatus, ConversationSummary,
    InteractionMetadata, Message, MessageRole, NewMessage,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, customer_id, status, priority, category, escalated, \
     human_agent_id, message_count, version, customer_context, classification_history, \
     articles_referenced, created_at, updated_at, resolved_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, classification, processing_time_ms, created_at";

/// Internal row type for conversation queries.
#[derive(FromRow)]
struct ConversationRow {
    id: String,
    customer_id: String,
    status: String,
    priority: Option<String>,
    category: Option<String>,
    escalated: bool,
    human_agent_id: Option<String>,
    message_count: i64,
    version: i64,
    customer_context: String,
    classification_history: String,
    articles_referenced: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = MemoryError;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: row.id,
            customer_id: row.customer_id,
            status: ConversationStatus::from_str_lossy(&row.status),
            priority: row.priority,
            category: row.category,
            escalated: row.escalated,
            human_agent_id: row.human_agent_id,
            message_count: row.message_count,
            version: row.version,
            customer_context: serde_json::from_str(&row.customer_context)?,
            classification_history: serde_json::from_str(&row.classification_history)?,
            articles_referenced: serde_json::from_str(&row.articles_referenced)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Internal row type for message queries.
#[derive(FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    classification: Option<String>,
    processing_time_ms: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = MemoryError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role: MessageRole::from_str_lossy(&row.role),
            content: row.content,
            classification: row
                .classification
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            processing_time_ms: row.processing_time_ms,
            created_at: row.created_at,
        })
    }
}

impl ConversationStore {
    // ── Conversations ───────────────────────────────────────────

    /// Create a new conversation for a customer. Starts at version 1
    /// with no messages.
    pub async fn create_conversation(
        &self,
        customer_id: &str,
        initial_context: Value,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            status: ConversationStatus::Open,
            priority: None,
            category: None,
            escalated: false,
            human_agent_id: None,
            message_count: 0,
            version: 1,
            customer_context: initial_context,
            classification_history: Vec::new(),
            articles_referenced: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        sqlx::query(
            "INSERT INTO conversations
             (id, customer_id, status, escalated, message_count, version,
              customer_context, classification_history, articles_referenced,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&conversation.id)
        .bind(&conversation.customer_id)
        .bind(conversation.status.as_str())
        .bind(conversation.escalated)
        .bind(conversation.message_count)
        .bind(conversation.version)
        .bind(serde_json::to_string(&conversation.customer_context)?)
        .bind("[]")
        .bind("[]")
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Get a conversation by ID.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let row: ConversationRow = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MemoryError::NotFound(conversation_id.to_string()))?;

        row.try_into()
    }

    /// Append messages to a conversation under the optimistic version
    /// guard, in one transaction.
    ///
    /// Fails with `VersionConflict` when the stored version no longer
    /// matches `expected_version`; the caller must re-read and retry.
    /// Bumps the version by one and the message count by the batch size,
    /// and merges any classification / article metadata onto the
    /// conversation row. Returns the updated conversation and the
    /// stored messages in append order.
    pub async fn append_messages(
        &self,
        conversation_id: &str,
        expected_version: i64,
        messages: &[NewMessage],
        metadata: Option<&InteractionMetadata>,
    ) -> Result<(Conversation, Vec<Message>)> {
        let current = self.get_conversation(conversation_id).await?;
        if current.version != expected_version {
            return Err(MemoryError::VersionConflict {
                conversation_id: conversation_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        if messages.is_empty() {
            return Ok((current, Vec::new()));
        }

        let now = Utc::now();

        // Creation timestamps are assigned in batch order so the total
        // order within the conversation matches append order.
        let stored: Vec<Message> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                role: m.role,
                content: m.content.clone(),
                classification: m.classification.clone(),
                processing_time_ms: m.processing_time_ms,
                created_at: now + chrono::Duration::microseconds(i as i64),
            })
            .collect();

        let mut classification_history = current.classification_history.clone();
        let mut articles = current.articles_referenced.clone();
        let mut category = current.category.clone();
        let mut priority = current.priority.clone();
        let mut escalated = current.escalated;

        if let Some(meta) = metadata {
            if let Some(classification) = &meta.classification {
                classification_history.push(ClassificationRecord {
                    timestamp: now,
                    classification: classification.clone(),
                });
                if let Some(c) = classification.get("category").and_then(Value::as_str) {
                    category = Some(c.to_string());
                }
                if let Some(p) = classification.get("priority").and_then(Value::as_str) {
                    priority = Some(p.to_string());
                }
                escalated = escalated
                    || classification
                        .get("requires_human_escalation")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
            }
            for usage in &meta.articles_used {
                if !articles.contains(&usage.article_id) {
                    articles.push(usage.article_id.clone());
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        // The guarded UPDATE is the serialization point: first write of
        // the transaction, so racing writers queue on the write lock and
        // exactly one of them sees the expected version.
        let result = sqlx::query(
            "UPDATE conversations SET
                version = version + 1,
                message_count = message_count + ?1,
                category = ?2,
                priority = ?3,
                escalated = ?4,
                classification_history = ?5,
                articles_referenced = ?6,
                updated_at = ?7
             WHERE id = ?8 AND version = ?9",
        )
        .bind(messages.len() as i64)
        .bind(&category)
        .bind(&priority)
        .bind(escalated)
        .bind(serde_json::to_string(&classification_history)?)
        .bind(serde_json::to_string(&articles)?)
        .bind(now)
        .bind(conversation_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM conversations WHERE id = ?1")
                    .bind(conversation_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                Some(actual) => Err(MemoryError::VersionConflict {
                    conversation_id: conversation_id.to_string(),
                    expected: expected_version,
                    actual,
                }),
                None => Err(MemoryError::NotFound(conversation_id.to_string())),
            };
        }

        for message in &stored {
            sqlx::query(
                "INSERT INTO messages
                 (id, conversation_id, role, content, classification, processing_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&message.id)
            .bind(&message.conversation_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(
                message
                    .classification
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(message.processing_time_ms)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(meta) = metadata {
            for usage in &meta.articles_used {
                sqlx::query(
                    "INSERT INTO kb_usage
                     (id, conversation_id, article_id, article_title, relevance_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(conversation_id)
                .bind(&usage.article_id)
                .bind(&usage.title)
                .bind(usage.relevance_score)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        let conversation = Conversation {
            message_count: current.message_count + messages.len() as i64,
            version: expected_version + 1,
            category,
            priority,
            escalated,
            classification_history,
            articles_referenced: articles,
            updated_at: now,
            ..current
        };

        Ok((conversation, stored))
    }

    /// Update the conversation status under the optimistic version guard.
    ///
    /// `Resolved` records `resolved_at`; `Escalated` sets the escalation
    /// flag and assigns the human agent when given.
    pub async fn update_status(
        &self,
        conversation_id: &str,
        expected_version: i64,
        status: ConversationStatus,
        human_agent_id: Option<&str>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE conversations SET
                status = ?1,
                version = version + 1,
                escalated = CASE WHEN ?1 = 'escalated' THEN 1 ELSE escalated END,
                human_agent_id = COALESCE(?2, human_agent_id),
                resolved_at = CASE WHEN ?1 = 'resolved' THEN ?3 ELSE resolved_at END,
                updated_at = ?3
             WHERE id = ?4 AND version = ?5",
        )
        .bind(status.as_str())
        .bind(human_agent_id)
        .bind(now)
        .bind(conversation_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM conversations WHERE id = ?1")
                    .bind(conversation_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match actual {
                Some(actual) => Err(MemoryError::VersionConflict {
                    conversation_id: conversation_id.to_string(),
                    expected: expected_version,
                    actual,
                }),
                None => Err(MemoryError::NotFound(conversation_id.to_string())),
            };
        }

        self.get_conversation(conversation_id).await
    }

    /// Most recent open or in-progress conversation for a customer,
    /// touched within `active_window`.
    pub async fn find_recent_active(
        &self,
        customer_id: &str,
        active_window: chrono::Duration,
    ) -> Result<Option<Conversation>> {
        let cutoff = Utc::now() - active_window;
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE customer_id = ?1
               AND status IN ('open', 'in_progress')
               AND updated_at > ?2
             ORDER BY updated_at DESC
             LIMIT 1"
        ))
        .bind(customer_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }

    /// Recent conversations for a customer, newest first.
    pub async fn list_customer_conversations(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE customer_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))
        .bind(customer_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Conversation::try_from).collect()
    }

    /// Bulk-archive resolved conversations whose `resolved_at` is older
    /// than the cutoff. Returns the number archived.
    pub async fn archive_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE conversations SET
                status = 'archived',
                version = version + 1,
                updated_at = ?1
             WHERE status = 'resolved'
               AND resolved_at IS NOT NULL
               AND resolved_at < ?2",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ── Messages ────────────────────────────────────────────────

    /// Page of messages for a conversation, oldest first within the page.
    ///
    /// Pages walk backwards through history: with no cursor the newest
    /// `limit` messages are returned; passing the `created_at` of the
    /// oldest message seen so far as `before` fetches the previous page,
    /// so iteration is restartable from any point.
    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = match before {
            Some(cursor) => {
                sqlx::query_as(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND created_at < ?2
                     ORDER BY created_at DESC
                     LIMIT ?3"
                ))
                .bind(conversation_id)
                .bind(cursor)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC
                     LIMIT ?2"
                ))
                .bind(conversation_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    // ── Knowledge-base usage ────────────────────────────────────

    /// Record which knowledge articles were consulted for a conversation.
    pub async fn record_article_usage(
        &self,
        conversation_id: &str,
        articles: &[ArticleUsage],
    ) -> Result<()> {
        let now = Utc::now();
        for usage in articles {
            sqlx::query(
                "INSERT INTO kb_usage
                 (id, conversation_id, article_id, article_title, relevance_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(conversation_id)
            .bind(&usage.article_id)
            .bind(&usage.title)
            .bind(usage.relevance_score)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // ── Summaries ───────────────────────────────────────────────

    /// Save a conversation summary (idempotent upsert).
    pub async fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_summaries
             (conversation_id, summary, message_count, category, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id) DO UPDATE SET
                summary = excluded.summary,
                message_count = excluded.message_count,
                category = excluded.category,
                generated_at = excluded.generated_at",
        )
        .bind(&summary.conversation_id)
        .bind(&summary.summary)
        .bind(summary.message_count)
        .bind(&summary.category)
        .bind(summary.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the stored summary for a conversation, if any.
    pub async fn get_summary(&self, conversation_id: &str) -> Result<Option<ConversationSummary>> {
        let row = sqlx::query_as::<_, (String, String, i64, Option<String>, DateTime<Utc>)>(
            "SELECT conversation_id, summary, message_count, category, generated_at
             FROM conversation_summaries WHERE conversation_id = ?1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(conversation_id, summary, message_count, category, generated_at)| {
                ConversationSummary {
                    conversation_id,
                    summary,
                    message_count,
                    category,
                    generated_at,
                }
            },
        ))
    }
}

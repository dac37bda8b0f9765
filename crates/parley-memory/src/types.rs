//! Core data types for the conversation memory layer.
//!
//! A **conversation** is the durable aggregate root; **messages** are
//! immutable rows hanging off it, totally ordered by `created_at`.
//! Every write to a conversation bumps its `version`, which is the
//! optimistic-concurrency guard checked by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a support conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Newly opened, no agent response yet
    Open,
    /// Actively being worked
    InProgress,
    /// Closed with a resolution
    Resolved,
    /// Handed off to a human agent
    Escalated,
    /// Aged out by the maintenance purge
    Archived,
}

impl ConversationStatus {
    /// Stable string form used in SQL and cached snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Archived => "archived",
        }
    }

    /// Parse from string, falling back to `Open`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "resolved" => Self::Resolved,
            "escalated" => Self::Escalated,
            "archived" => Self::Archived,
            _ => Self::Open,
        }
    }

    /// Whether the conversation can still accept customer messages.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The customer
    User,
    /// The automated (or human) agent
    Agent,
    /// Injected system notes
    System,
}

impl MessageRole {
    /// Stable string form used in SQL and cached snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    /// Parse from string, falling back to `System`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "agent" => Self::Agent,
            _ => Self::System,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer support conversation (durable aggregate root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID (UUID)
    pub id: String,
    /// Customer this conversation belongs to
    pub customer_id: String,
    /// Lifecycle state
    pub status: ConversationStatus,
    /// Priority from the latest classification (low, medium, high, urgent)
    pub priority: Option<String>,
    /// Category from the latest classification (billing, technical, …)
    pub category: Option<String>,
    /// Whether a human hand-off was requested
    pub escalated: bool,
    /// Human agent assigned on escalation
    pub human_agent_id: Option<String>,
    /// Total messages appended so far; increases monotonically
    pub message_count: i64,
    /// Optimistic-concurrency counter; bumped by every write
    pub version: i64,
    /// Opaque customer attributes (plan, account info, …)
    pub customer_context: Value,
    /// Classifications recorded over the conversation, oldest first
    pub classification_history: Vec<ClassificationRecord>,
    /// Knowledge-article IDs referenced while answering, in first-use order
    pub articles_referenced: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last write timestamp
    pub updated_at: DateTime<Utc>,
    /// Set when the conversation transitions to `Resolved`
    pub resolved_at: Option<DateTime<Utc>>,
}

/// One classification produced during the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// When the classification was recorded
    pub timestamp: DateTime<Utc>,
    /// Opaque classification blob from the collaborator
    pub classification: Value,
}

/// A single message within a conversation. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (UUID)
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Author role
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Classification attached to this message, if any
    pub classification: Option<Value>,
    /// How long the collaborator took to produce this message
    pub processing_time_ms: Option<i64>,
    /// Creation timestamp; messages are totally ordered by it within a conversation
    pub created_at: DateTime<Utc>,
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Author role
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Classification to attach to the stored message
    pub classification: Option<Value>,
    /// Processing duration measurement
    pub processing_time_ms: Option<i64>,
}

impl NewMessage {
    /// A customer message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            classification: None,
            processing_time_ms: None,
        }
    }

    /// An agent response.
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            content: content.into(),
            classification: None,
            processing_time_ms: None,
        }
    }

    /// A system note.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            classification: None,
            processing_time_ms: None,
        }
    }

    /// Attach a classification blob.
    pub fn with_classification(mut self, classification: Value) -> Self {
        self.classification = Some(classification);
        self
    }

    /// Attach a processing duration.
    pub fn with_processing_time(mut self, millis: i64) -> Self {
        self.processing_time_ms = Some(millis);
        self
    }
}

/// Metadata attached to a recorded interaction.
///
/// The classification blob, when present, also updates the
/// conversation-level `category`, `priority` and `escalated` fields
/// (keys `category`, `priority`, `requires_human_escalation`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionMetadata {
    /// Opaque classification result from the collaborator
    pub classification: Option<Value>,
    /// Knowledge-base articles consulted while answering
    #[serde(default)]
    pub articles_used: Vec<ArticleUsage>,
    /// End-to-end processing duration for the interaction
    pub processing_time_ms: Option<i64>,
}

/// A knowledge-base article consulted while answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleUsage {
    /// Article ID
    pub article_id: String,
    /// Article title at time of use
    pub title: Option<String>,
    /// Retrieval relevance score
    pub relevance_score: Option<f64>,
}

/// Snapshot handed to request handlers and cached between turns.
///
/// A derived, disposable projection of the durable conversation row;
/// never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// The conversation snapshot
    pub conversation: Conversation,
    /// Wall-clock span from creation to last update
    pub duration_minutes: f64,
}

impl ConversationContext {
    /// Build a context from a conversation snapshot.
    pub fn new(conversation: Conversation) -> Self {
        let duration_minutes = (conversation.updated_at - conversation.created_at)
            .num_milliseconds() as f64
            / 60_000.0;
        Self {
            conversation,
            duration_minutes,
        }
    }
}

/// Stored summary of a (usually resolved) conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation the summary describes
    pub conversation_id: String,
    /// Summary text
    pub summary: String,
    /// Message count at generation time
    pub message_count: i64,
    /// Category at generation time
    pub category: Option<String>,
    /// When the summary was generated
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ConversationStatus::Open,
            ConversationStatus::InProgress,
            ConversationStatus::Resolved,
            ConversationStatus::Escalated,
            ConversationStatus::Archived,
        ] {
            assert_eq!(ConversationStatus::from_str_lossy(status.as_str()), status);
        }
        assert_eq!(
            ConversationStatus::from_str_lossy("bogus"),
            ConversationStatus::Open
        );
    }

    #[test]
    fn only_open_and_in_progress_are_active() {
        assert!(ConversationStatus::Open.is_active());
        assert!(ConversationStatus::InProgress.is_active());
        assert!(!ConversationStatus::Resolved.is_active());
        assert!(!ConversationStatus::Escalated.is_active());
        assert!(!ConversationStatus::Archived.is_active());
    }

    #[test]
    fn context_duration_is_derived() {
        let now = Utc::now();
        let conversation = Conversation {
            id: "c1".into(),
            customer_id: "cust".into(),
            status: ConversationStatus::Open,
            priority: None,
            category: None,
            escalated: false,
            human_agent_id: None,
            message_count: 0,
            version: 1,
            customer_context: Value::Null,
            classification_history: Vec::new(),
            articles_referenced: Vec::new(),
            created_at: now - chrono::Duration::minutes(30),
            updated_at: now,
            resolved_at: None,
        };
        let context = ConversationContext::new(conversation);
        assert!((context.duration_minutes - 30.0).abs() < 0.01);
    }
}

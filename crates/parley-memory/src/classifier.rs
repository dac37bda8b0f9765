//! External classification/response collaborator seam.
//!
//! The hosted model that classifies messages and drafts responses is an
//! external collaborator: the coordinator treats it as an opaque call
//! with no retry responsibility of its own. Only the trait and its
//! outcome type live here; implementations belong to the application.

use crate::types::{ArticleUsage, InteractionMetadata, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Boxed error type for collaborator implementations.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one classification/response round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    /// Ticket category (billing, technical, …)
    pub category: String,
    /// Priority (low, medium, high, urgent)
    pub priority: String,
    /// Detected customer sentiment
    pub sentiment: String,
    /// Whether a human hand-off is required
    pub escalation_required: bool,
    /// Drafted agent response
    pub response_text: String,
    /// Knowledge articles the response drew on
    pub referenced_article_ids: Vec<String>,
}

impl ClassificationOutcome {
    /// Convert into the metadata shape `record_interaction` expects.
    pub fn as_metadata(&self) -> InteractionMetadata {
        InteractionMetadata {
            classification: Some(json!({
                "category": self.category,
                "priority": self.priority,
                "sentiment": self.sentiment,
                "requires_human_escalation": self.escalation_required,
            })),
            articles_used: self
                .referenced_article_ids
                .iter()
                .map(|id| ArticleUsage {
                    article_id: id.clone(),
                    title: None,
                    relevance_score: None,
                })
                .collect(),
            processing_time_ms: None,
        }
    }
}

/// The classification/response collaborator.
///
/// Given the latest customer text, recent history and customer context,
/// produces a classification and a drafted response. Retries, if any,
/// belong to the caller of the coordinator, not here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SupportResponder: Send + Sync {
    /// Classify the conversation and draft a response.
    async fn respond(
        &self,
        conversation_text: &str,
        recent_history: &[Message],
        customer_context: &Value,
    ) -> std::result::Result<ClassificationOutcome, CollaboratorError>;
}

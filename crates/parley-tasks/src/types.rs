//! Task types and payload definitions.
//!
//! A task is the unit of deferred work: a kind (resolved to a handler
//! through the registry), an opaque payload, a priority lane and the
//! retry bookkeeping the queue maintains.

use crate::error::{Result, TaskError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Kinds of deferred work, each mapped to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Notify human agents about an escalated conversation
    NotifyEscalation,
    /// Generate and store a conversation summary
    GenerateSummary,
    /// Refresh the knowledge-article index
    RefreshIndex,
    /// Archive old resolved conversations
    PurgeOldConversations,
}

impl TaskKind {
    /// Stable string form used in SQL and task messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotifyEscalation => "notify-escalation",
            Self::GenerateSummary => "generate-summary",
            Self::RefreshIndex => "refresh-index",
            Self::PurgeOldConversations => "purge-old-conversations",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notify-escalation" => Some(Self::NotifyEscalation),
            "generate-summary" => Some(Self::GenerateSummary),
            "refresh-index" => Some(Self::RefreshIndex),
            "purge-old-conversations" => Some(Self::PurgeOldConversations),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority partition of the queue. Lower rank drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Real-time follow-ups to live conversations
    Realtime,
    /// Escalation and agent notifications
    Notifications,
    /// Summaries and reporting
    Analytics,
    /// Recurring maintenance injected by the scheduler
    Maintenance,
}

impl Lane {
    /// Every lane, in drain order.
    pub const ALL: [Lane; 4] = [
        Lane::Realtime,
        Lane::Notifications,
        Lane::Analytics,
        Lane::Maintenance,
    ];

    /// Numeric drain priority (lower drains first).
    pub fn rank(&self) -> i64 {
        match self {
            Self::Realtime => 0,
            Self::Notifications => 1,
            Self::Analytics => 2,
            Self::Maintenance => 3,
        }
    }

    /// Stable string form used in SQL and task messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Notifications => "notifications",
            Self::Analytics => "analytics",
            Self::Maintenance => "maintenance",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "realtime" => Some(Self::Realtime),
            "notifications" => Some(Self::Notifications),
            "analytics" => Some(Self::Analytics),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state.
///
/// `FailedRetryable` tasks become eligible again once their `not_before`
/// passes; `Succeeded` and `FailedDead` are terminal and retained for
/// inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a worker
    Running,
    /// Acked after successful execution
    Succeeded,
    /// Nacked with retry budget remaining; rescheduled with backoff
    FailedRetryable,
    /// Retry budget exhausted; kept for inspection, never resurrected
    FailedDead,
}

impl TaskStatus {
    /// Stable string form used in SQL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::FailedRetryable => "failed-retryable",
            Self::FailedDead => "failed-dead",
        }
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed-retryable" => Some(Self::FailedRetryable),
            "failed-dead" => Some(Self::FailedDead),
            _ => None,
        }
    }

    /// Whether the task will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedDead)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task ID
    pub id: Uuid,
    /// Handler lookup key
    pub kind: TaskKind,
    /// Arguments for the handler
    pub payload: Value,
    /// Priority lane
    pub lane: Lane,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Deliveries so far (incremented when a worker claims the task)
    pub attempt: i32,
    /// Delivery budget before the task goes dead
    pub max_attempts: i32,
    /// Earliest eligible run time (backoff reschedules push this out)
    pub not_before: DateTime<Utc>,
    /// Error from the most recent failed delivery
    pub last_error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task eligible to run immediately.
    pub fn new(kind: TaskKind, payload: Value, lane: Lane, max_attempts: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            lane,
            status: TaskStatus::Pending,
            attempt: 0,
            max_attempts,
            not_before: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the delivery budget.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay the first eligible run.
    pub fn with_not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = at;
        self
    }
}

/// Internal row type for queue queries.
#[derive(FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub lane: String,
    pub status: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub not_before: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| TaskError::InvalidConfig(format!("invalid task ID: {e}")))?,
            kind: TaskKind::parse(&row.kind).ok_or_else(|| TaskError::UnknownKind(row.kind))?,
            payload: serde_json::from_str(&row.payload)?,
            lane: Lane::parse(&row.lane)
                .ok_or_else(|| TaskError::InvalidConfig(format!("invalid lane: {}", row.lane)))?,
            status: TaskStatus::parse(&row.status).ok_or_else(|| {
                TaskError::InvalidConfig(format!("invalid status: {}", row.status))
            })?,
            attempt: row.attempt,
            max_attempts: row.max_attempts,
            not_before: row.not_before,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ── Built-in payloads ───────────────────────────────────────────────

/// Payload for [`TaskKind::NotifyEscalation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPayload {
    /// Escalated conversation
    pub conversation_id: String,
    /// Affected customer
    pub customer_id: String,
    /// Priority from the classification that triggered the escalation
    pub priority: String,
}

/// Payload for [`TaskKind::GenerateSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    /// Conversation to summarize
    pub conversation_id: String,
}

/// Payload for [`TaskKind::RefreshIndex`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshIndexPayload {
    /// New or changed articles; empty means a full refresh
    #[serde(default)]
    pub article_ids: Vec<String>,
}

/// Payload for [`TaskKind::PurgeOldConversations`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgePayload {
    /// Age threshold for archiving resolved conversations
    #[serde(default = "default_purge_days")]
    pub days_old: i64,
}

impl Default for PurgePayload {
    fn default() -> Self {
        Self {
            days_old: default_purge_days(),
        }
    }
}

fn default_purge_days() -> i64 {
    90
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [
            TaskKind::NotifyEscalation,
            TaskKind::GenerateSummary,
            TaskKind::RefreshIndex,
            TaskKind::PurgeOldConversations,
        ] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::parse("bogus"), None);
    }

    #[test]
    fn lanes_drain_in_declared_order() {
        let ranks: Vec<i64> = Lane::ALL.iter().map(Lane::rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert_eq!(Lane::Realtime.rank(), 0);
        assert_eq!(Lane::Maintenance.rank(), 3);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::FailedDead.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::FailedRetryable.is_terminal());
    }

    #[test]
    fn purge_payload_defaults_to_ninety_days() {
        let payload: PurgePayload = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(payload.days_old, 90);
    }
}

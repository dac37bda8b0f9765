//! TaskQueue — durable, lane-prioritized handoff of deferred work.
//!
//! SQLite-backed so queued work survives restarts. Workers claim tasks
//! with an optimistic `UPDATE ... WHERE status` guard, so any number of
//! workers can pull from one queue without handing the same delivery to
//! two of them. Retry scheduling (exponential backoff, dead-lettering)
//! lives in the queue; workers only ack and nack.

use crate::error::{Result, TaskError};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

mod migrations;
mod queries;


/// Retry policy for the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base retry delay in seconds; delay = base * 2^attempts, capped
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Upper bound on any retry delay, in seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Delivery budget for tasks enqueued without an explicit one
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_cap_secs() -> u64 {
    15 * 60
}

fn default_max_attempts() -> i32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            default_max_attempts: default_max_attempts(),
        }
    }
}

impl QueueConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backoff base.
    pub fn with_backoff_base_secs(mut self, secs: u64) -> Self {
        self.backoff_base_secs = secs;
        self
    }

    /// Set the backoff cap.
    pub fn with_backoff_cap_secs(mut self, secs: u64) -> Self {
        self.backoff_cap_secs = secs;
        self
    }

    /// Set the default delivery budget.
    pub fn with_default_max_attempts(mut self, attempts: i32) -> Self {
        self.default_max_attempts = attempts;
        self
    }
}

/// SQLite-backed durable task queue.
#[derive(Clone)]
pub struct TaskQueue {
    pub(crate) pool: SqlitePool,
    pub(crate) config: QueueConfig,
}

impl TaskQueue {
    /// Open (or create) a task queue at the given path.
    pub async fn from_path(db_path: &std::path::Path, config: QueueConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TaskError::InvalidConfig(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await?;

        let queue = Self { pool, config };
        queue.run_migrations().await?;
        info!("Task queue initialized at {}", db_path.display());
        Ok(queue)
    }

    /// In-memory queue (for tests).
    pub async fn in_memory(config: QueueConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let queue = Self { pool, config };
        queue.run_migrations().await?;
        debug!("In-memory task queue initialized");
        Ok(queue)
    }
}

//! ConversationStore — SQLite persistence for conversations and messages.
//!
//! Source of truth for the memory layer. All writes are atomic per
//! conversation and guarded by the `version` column; cross-conversation
//! transactions are never required.

use crate::error::{MemoryError, Result};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

mod crud;
mod migrations;


/// SQLite-backed conversation store.
#[derive(Clone)]
pub struct ConversationStore {
    pub(crate) pool: SqlitePool,
}

impl ConversationStore {
    /// Open (or create) a conversation store at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Internal(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // WAL for read/write concurrency; busy_timeout so racing writers
        // queue on the write lock instead of erroring.
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Conversation store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        debug!("In-memory conversation store initialized");
        Ok(store)
    }

    /// Health probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

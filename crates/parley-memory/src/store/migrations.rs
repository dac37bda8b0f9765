use super::ConversationStore;
use crate::error::Result;

impl ConversationStore {
    // ── Migrations ──────────────────────────────────────────────

    pub(crate) async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id                     TEXT PRIMARY KEY,
                customer_id            TEXT NOT NULL,
                status                 TEXT NOT NULL DEFAULT 'open',
                priority               TEXT,
                category               TEXT,
                escalated              INTEGER NOT NULL DEFAULT 0,
                human_agent_id         TEXT,
                message_count          INTEGER NOT NULL DEFAULT 0,
                version                INTEGER NOT NULL DEFAULT 1,
                customer_context       TEXT NOT NULL DEFAULT '{}',
                classification_history TEXT NOT NULL DEFAULT '[]',
                articles_referenced    TEXT NOT NULL DEFAULT '[]',
                created_at             TEXT NOT NULL,
                updated_at             TEXT NOT NULL,
                resolved_at            TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_customer
             ON conversations(customer_id, status, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_resolved
             ON conversations(status, resolved_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id                 TEXT PRIMARY KEY,
                conversation_id    TEXT NOT NULL REFERENCES conversations(id),
                role               TEXT NOT NULL,
                content            TEXT NOT NULL,
                classification     TEXT,
                processing_time_ms INTEGER,
                created_at         TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kb_usage (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                article_id      TEXT NOT NULL,
                article_title   TEXT,
                relevance_score REAL,
                created_at      TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_usage_conversation
             ON kb_usage(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversation_summaries (
                conversation_id TEXT PRIMARY KEY,
                summary         TEXT NOT NULL,
                message_count   INTEGER NOT NULL,
                category        TEXT,
                generated_at    TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

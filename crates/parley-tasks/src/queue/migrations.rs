use super::TaskQueue;
use crate::error::Result;

impl TaskQueue {
    // ── Migrations ──────────────────────────────────────────────

    pub(crate) async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id           TEXT PRIMARY KEY,
                kind         TEXT NOT NULL,
                payload      TEXT NOT NULL,
                lane         TEXT NOT NULL,
                lane_rank    INTEGER NOT NULL,
                status       TEXT NOT NULL DEFAULT 'pending',
                attempt      INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                not_before   TEXT NOT NULL,
                last_error   TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_claim
             ON tasks(status, not_before, lane_rank, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_kind ON tasks(kind, status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

use super::TaskQueue;
use crate::error::{Result, TaskError};
use crate::types::{Lane, Task, TaskKind, TaskRow, TaskStatus};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, kind, payload, lane, status, attempt, max_attempts, \
     not_before, last_error, created_at, updated_at";

impl TaskQueue {
    // ── Enqueue ─────────────────────────────────────────────────

    /// Enqueue a task with the default delivery budget, eligible
    /// immediately.
    pub async fn enqueue(&self, kind: TaskKind, payload: Value, lane: Lane) -> Result<Uuid> {
        let task = Task::new(kind, payload, lane, self.config.default_max_attempts);
        let id = task.id;
        self.enqueue_task(&task).await?;
        Ok(id)
    }

    /// Enqueue a fully specified task (custom budget or delayed start).
    pub async fn enqueue_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks
             (id, kind, payload, lane, lane_rank, status, attempt, max_attempts,
              not_before, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(task.id.to_string())
        .bind(task.kind.as_str())
        .bind(serde_json::to_string(&task.payload)?)
        .bind(task.lane.as_str())
        .bind(task.lane.rank())
        .bind(task.status.as_str())
        .bind(task.attempt)
        .bind(task.max_attempts)
        .bind(task.not_before)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(task_id = %task.id, kind = %task.kind, lane = %task.lane, "task enqueued");
        Ok(())
    }

    /// Enqueue unless an identical unsettled task already exists.
    ///
    /// Returns `None` when a task with the same kind, payload and lane
    /// is still pending, retrying or running. Used by the scheduler so
    /// duplicate maintenance ticks collapse instead of piling up.
    pub async fn enqueue_unique(
        &self,
        kind: TaskKind,
        payload: Value,
        lane: Lane,
    ) -> Result<Option<Uuid>> {
        let task = Task::new(kind, payload, lane, self.config.default_max_attempts);
        let payload_json = serde_json::to_string(&task.payload)?;

        let result = sqlx::query(
            "INSERT INTO tasks
             (id, kind, payload, lane, lane_rank, status, attempt, max_attempts,
              not_before, last_error, created_at, updated_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11
             WHERE NOT EXISTS (
                 SELECT 1 FROM tasks
                 WHERE kind = ?2 AND payload = ?3 AND lane = ?4
                   AND status IN ('pending', 'failed-retryable', 'running')
             )",
        )
        .bind(task.id.to_string())
        .bind(task.kind.as_str())
        .bind(&payload_json)
        .bind(task.lane.as_str())
        .bind(task.lane.rank())
        .bind(task.status.as_str())
        .bind(task.attempt)
        .bind(task.max_attempts)
        .bind(task.not_before)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(task.id))
    }

    // ── Dequeue ─────────────────────────────────────────────────

    /// Claim the next eligible task from one lane.
    pub async fn dequeue(&self, lane: Lane) -> Result<Option<Task>> {
        self.claim(Some(lane)).await
    }

    /// Claim the next eligible task across all lanes, highest-priority
    /// lane first.
    pub async fn dequeue_any(&self) -> Result<Option<Task>> {
        self.claim(None).await
    }

    /// Optimistic claim: pick a candidate, then take it with a guarded
    /// UPDATE. Losing the race to another worker just moves on to the
    /// next candidate. Claiming counts as a delivery, so `attempt` is
    /// incremented here.
    async fn claim(&self, lane: Option<Lane>) -> Result<Option<Task>> {
        loop {
            let now = Utc::now();
            let candidate: Option<String> = match lane {
                Some(lane) => {
                    sqlx::query_scalar(
                        "SELECT id FROM tasks
                         WHERE lane = ?1
                           AND status IN ('pending', 'failed-retryable')
                           AND not_before <= ?2
                         ORDER BY created_at ASC
                         LIMIT 1",
                    )
                    .bind(lane.as_str())
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_scalar(
                        "SELECT id FROM tasks
                         WHERE status IN ('pending', 'failed-retryable')
                           AND not_before <= ?1
                         ORDER BY lane_rank ASC, created_at ASC
                         LIMIT 1",
                    )
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await?
                }
            };

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = sqlx::query(
                "UPDATE tasks
                 SET status = 'running', attempt = attempt + 1, updated_at = ?1
                 WHERE id = ?2 AND status IN ('pending', 'failed-retryable')",
            )
            .bind(now)
            .bind(&id)
            .execute(&self.pool)
            .await?;

            if claimed.rows_affected() == 1 {
                let task_id = Uuid::parse_str(&id)
                    .map_err(|e| TaskError::InvalidConfig(format!("invalid task ID: {e}")))?;
                return Ok(Some(self.get_task(task_id).await?));
            }
            // Another worker won this candidate; try the next one.
        }
    }

    // ── Settle ──────────────────────────────────────────────────

    /// Mark a task succeeded. Terminal; the row is retained.
    pub async fn ack(&self, task_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET status = 'succeeded', updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TaskError::TaskNotFound(task_id));
        }
        tracing::debug!(%task_id, "task acked");
        Ok(())
    }

    /// Report a failed delivery.
    ///
    /// With budget remaining the task is rescheduled with exponential
    /// backoff (`base * 2^attempts`, capped). Otherwise it transitions
    /// to `failed-dead` and is retained for inspection, never silently
    /// discarded. Returns the resulting status.
    pub async fn nack(&self, task_id: Uuid, error: &str) -> Result<TaskStatus> {
        let task = self.get_task(task_id).await?;
        let now = Utc::now();

        if task.attempt < task.max_attempts {
            let shift = u32::try_from(task.attempt).unwrap_or(0).min(20);
            let delay_secs = self
                .config
                .backoff_base_secs
                .saturating_mul(1 << shift)
                .min(self.config.backoff_cap_secs);
            let not_before = now + chrono::Duration::seconds(delay_secs as i64);

            sqlx::query(
                "UPDATE tasks
                 SET status = 'failed-retryable', not_before = ?1, last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
            )
            .bind(not_before)
            .bind(error)
            .bind(now)
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;

            tracing::debug!(
                %task_id,
                attempt = task.attempt,
                delay_secs,
                "task nacked, rescheduled with backoff"
            );
            Ok(TaskStatus::FailedRetryable)
        } else {
            sqlx::query(
                "UPDATE tasks
                 SET status = 'failed-dead', last_error = ?1, updated_at = ?2
                 WHERE id = ?3",
            )
            .bind(error)
            .bind(now)
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                %task_id,
                kind = %task.kind,
                attempts = task.attempt,
                error,
                "task exhausted its retry budget, moved to dead letter"
            );
            Ok(TaskStatus::FailedDead)
        }
    }

    // ── Inspection & maintenance ────────────────────────────────

    /// Get a task by ID.
    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        let row: TaskRow =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
                .bind(task_id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or(TaskError::TaskNotFound(task_id))?;

        row.try_into()
    }

    /// Dead-lettered tasks, most recent first.
    pub async fn list_dead(&self, limit: usize) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = 'failed-dead'
             ORDER BY updated_at DESC
             LIMIT ?1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Unsettled tasks in a lane (or all lanes).
    pub async fn pending_count(&self, lane: Option<Lane>) -> Result<i64> {
        let count: i64 = match lane {
            Some(lane) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM tasks
                     WHERE lane = ?1 AND status IN ('pending', 'failed-retryable')",
                )
                .bind(lane.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM tasks WHERE status IN ('pending', 'failed-retryable')",
                )
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(count)
    }

    /// Task counts by status, for monitoring.
    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Return tasks stuck `running` longer than `older_than` to the
    /// queue.
    ///
    /// Covers workers that crashed between claim and settle; the task is
    /// redelivered, which is why handlers must be idempotent.
    pub async fn requeue_timed_out(&self, older_than: chrono::Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - older_than;
        let result = sqlx::query(
            "UPDATE tasks
             SET status = 'pending', updated_at = ?1
             WHERE status = 'running' AND updated_at < ?2",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            tracing::info!(requeued, "returned stuck running tasks to the queue");
        }
        Ok(requeued)
    }
}

//! Scheduler — fixed calendar of recurring maintenance tasks.
//!
//! Holds a static list of (trigger, kind, payload) entries and, on each
//! tick, enqueues due entries onto the maintenance lane. The whole
//! recurring workload is auditable in this one list instead of being
//! scattered across handler definitions.
//!
//! Run one scheduler per deployment. If two instances do tick at once,
//! `enqueue_unique` collapses identical unsettled tasks and the
//! handlers are idempotent, so duplicates are tolerated rather than
//! harmful.

use crate::error::Result;
use crate::queue::TaskQueue;
use crate::types::{Lane, TaskKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// When a schedule entry fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Cron expression, minute-hour-day-month-weekday
    Cron {
        /// Supported forms: `"*/N * * * *"`, `"M */N * * *"`, `"M H * * *"`
        expression: String,
    },
    /// Fixed interval in seconds
    Interval {
        /// Seconds between runs
        seconds: u64,
    },
}

impl Trigger {
    /// Cron trigger shorthand.
    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    /// Interval trigger shorthand.
    pub fn interval(seconds: u64) -> Self {
        Self::Interval { seconds }
    }

    /// Next fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { seconds } => Some(from + Duration::seconds(*seconds as i64)),
            Self::Cron { expression } => next_cron_after(expression, from),
        }
    }
}

/// Supported cron subset: every-N-minutes, every-N-hours at a fixed
/// minute, and daily at a fixed hour and minute. Unsupported
/// expressions fall back to hourly.
fn next_cron_after(expression: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() < 5 {
        warn!(expression, "invalid cron expression");
        return None;
    }
    let (minute, hour) = (parts[0], parts[1]);

    // "*/N * * * *" - every N minutes
    if let Some(n) = minute
        .strip_prefix("*/")
        .and_then(|v| v.parse::<i64>().ok())
    {
        if hour == "*" {
            return Some(from + Duration::minutes(n));
        }
    }

    // "M */N * * *" - every N hours
    if minute.parse::<u32>().is_ok() {
        if let Some(n) = hour.strip_prefix("*/").and_then(|v| v.parse::<i64>().ok()) {
            return Some(from + Duration::hours(n));
        }
    }

    // "M H * * *" - daily at H:M
    if let (Ok(m), Ok(h)) = (minute.parse::<u32>(), hour.parse::<u32>()) {
        let today = from.date_naive().and_hms_opt(h, m, 0)?.and_utc();
        return Some(if today > from {
            today
        } else {
            today + Duration::days(1)
        });
    }

    warn!(expression, "unsupported cron expression, defaulting to hourly");
    Some(from + Duration::hours(1))
}

/// One recurring task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Human-readable name, used in logs
    pub name: String,
    /// When to fire
    pub trigger: Trigger,
    /// Task kind to enqueue
    pub kind: TaskKind,
    /// Payload template for the enqueued task
    pub payload: Value,
}

impl ScheduleEntry {
    /// Create a schedule entry.
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        kind: TaskKind,
        payload: Value,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            kind,
            payload,
        }
    }
}

/// The stock maintenance calendar: refresh the knowledge index every
/// six hours, purge old conversations daily at 02:00 UTC.
pub fn default_calendar() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new(
            "refresh-knowledge-index",
            Trigger::interval(6 * 3600),
            TaskKind::RefreshIndex,
            json!({}),
        ),
        ScheduleEntry::new(
            "purge-old-conversations",
            Trigger::cron("0 2 * * *"),
            TaskKind::PurgeOldConversations,
            json!({ "days_old": 90 }),
        ),
    ]
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler runs at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tick interval in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_check_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick interval.
    pub fn with_check_interval(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    /// Enable or disable the scheduler.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

struct ScheduleSlot {
    entry: ScheduleEntry,
    next_run_at: Option<DateTime<Utc>>,
}

/// Periodic injector of maintenance tasks into the queue.
pub struct Scheduler {
    queue: Arc<TaskQueue>,
    slots: Vec<ScheduleSlot>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler over a queue and a calendar.
    pub fn new(queue: Arc<TaskQueue>, entries: Vec<ScheduleEntry>, config: SchedulerConfig) -> Self {
        let slots = entries
            .into_iter()
            .map(|entry| ScheduleSlot {
                entry,
                next_run_at: None,
            })
            .collect();
        Self {
            queue,
            slots,
            config,
        }
    }

    /// Run the tick loop until the token is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            info!("scheduler disabled by configuration");
            return Ok(());
        }

        self.prime(Utc::now());
        info!(entries = self.slots.len(), "scheduler started");

        let check_interval =
            std::time::Duration::from_secs(self.config.check_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Compute each entry's first fire time. The first fire is one
    /// period after startup, not immediately.
    pub(crate) fn prime(&mut self, now: DateTime<Utc>) {
        for slot in &mut self.slots {
            slot.next_run_at = slot.entry.trigger.next_after(now);
            debug!(
                entry = %slot.entry.name,
                next_run_at = ?slot.next_run_at,
                "schedule entry primed"
            );
        }
    }

    /// Enqueue every due entry onto the maintenance lane and advance its
    /// next fire time.
    pub(crate) async fn tick(&mut self, now: DateTime<Utc>) {
        let queue = self.queue.clone();
        for slot in &mut self.slots {
            let Some(due) = slot.next_run_at else { continue };
            if due > now {
                continue;
            }

            match queue
                .enqueue_unique(slot.entry.kind, slot.entry.payload.clone(), Lane::Maintenance)
                .await
            {
                Ok(Some(task_id)) => {
                    info!(entry = %slot.entry.name, %task_id, "maintenance task enqueued");
                }
                Ok(None) => {
                    debug!(entry = %slot.entry.name, "identical task still queued, skipped");
                }
                Err(e) => {
                    warn!(entry = %slot.entry.name, error = %e, "failed to enqueue maintenance task");
                }
            }
            slot.next_run_at = slot.entry.trigger.next_after(now);
        }
    }
}

#[cfg(test)]
mod tests;

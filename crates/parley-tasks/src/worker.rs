//! Worker pool — pulls tasks from the queue and runs their handlers.
//!
//! Each worker is an independent loop: dequeue across all lanes in
//! priority order, execute the kind-specific handler under a bounded
//! timeout, then ack or nack. Workers share no mutable state beyond
//! what the queue arbitrates. A claimed task runs to completion or
//! timeout; shutdown never preempts it mid-flight.

use crate::error::{Result, TaskError};
use crate::queue::TaskQueue;
use crate::types::{Task, TaskKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A kind-specific task body.
///
/// Handlers must be idempotent: a worker crash after execution but
/// before ack results in redelivery of the same task ID.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task kind this handler executes.
    fn kind(&self) -> TaskKind;

    /// Execute the task body. The returned value is recorded for
    /// observability only.
    async fn run(&self, payload: Value) -> Result<Value>;
}

/// Explicit kind-to-handler registry, populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its kind. Replaces any previous handler
    /// for the same kind.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            warn!(%kind, "handler replaced an existing registration");
        } else {
            debug!(%kind, "handler registered");
        }
    }

    /// Look up the handler for a kind.
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().copied().collect()
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed pool size
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Sleep between polls when the queue is empty, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Execution timeout per task, in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_task_timeout_secs() -> u64 {
    5 * 60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the empty-queue poll interval.
    pub fn with_poll_interval_ms(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }

    /// Set the per-task execution timeout.
    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = secs;
        self
    }
}

/// Fixed-size pool of independent task workers.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Create a pool over a queue and a populated registry.
    pub fn new(queue: Arc<TaskQueue>, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    /// Spawn the worker loops plus a reaper that returns tasks stuck
    /// `running` (crashed worker) to the queue. Loops exit when the
    /// token is cancelled; an in-flight task still runs to completion.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.worker_count + 1);
        for worker_id in 0..self.config.worker_count {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                self.queue.clone(),
                self.registry.clone(),
                self.config.clone(),
                shutdown.clone(),
            )));
        }
        handles.push(tokio::spawn(reaper_loop(
            self.queue.clone(),
            self.config.clone(),
            shutdown,
        )));
        info!(workers = self.config.worker_count, "worker pool started");
        handles
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    debug!(worker_id, "worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(worker_id, "worker shutting down");
                break;
            }
            next = queue.dequeue_any() => match next {
                Ok(Some(task)) => execute_task(worker_id, &queue, &registry, &config, task).await,
                Ok(None) => tokio::time::sleep(poll_interval).await,
                Err(e) => {
                    warn!(worker_id, error = %e, "dequeue failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

async fn execute_task(
    worker_id: usize,
    queue: &TaskQueue,
    registry: &HandlerRegistry,
    config: &WorkerConfig,
    task: Task,
) {
    let Some(handler) = registry.get(task.kind) else {
        warn!(task_id = %task.id, kind = %task.kind, "no handler registered");
        settle(queue, &task, Err(TaskError::UnknownKind(task.kind.to_string()))).await;
        return;
    };

    debug!(
        worker_id,
        task_id = %task.id,
        kind = %task.kind,
        attempt = task.attempt,
        "executing task"
    );

    let timeout = Duration::from_secs(config.task_timeout_secs);
    let outcome = match tokio::time::timeout(timeout, handler.run(task.payload.clone())).await {
        Ok(result) => result,
        Err(_) => Err(TaskError::Timeout {
            seconds: config.task_timeout_secs,
        }),
    };
    settle(queue, &task, outcome).await;
}

async fn settle(queue: &TaskQueue, task: &Task, outcome: Result<Value>) {
    let settled = match outcome {
        Ok(_) => queue.ack(task.id).await,
        Err(e) => {
            warn!(task_id = %task.id, kind = %task.kind, error = %e, "task failed");
            queue.nack(task.id, &e.to_string()).await.map(|_| ())
        }
    };
    if let Err(e) = settled {
        error!(task_id = %task.id, error = %e, "failed to settle task");
    }
}

async fn reaper_loop(queue: Arc<TaskQueue>, config: WorkerConfig, shutdown: CancellationToken) {
    // A task is presumed orphaned after twice its execution timeout.
    let grace = chrono::Duration::seconds((config.task_timeout_secs * 2) as i64);
    let interval = Duration::from_secs(config.task_timeout_secs.max(1));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = queue.requeue_timed_out(grace).await {
                    warn!(error = %e, "requeue of timed-out tasks failed");
                }
            }
        }
    }
}

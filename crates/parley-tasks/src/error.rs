//! Error types for the background task layer.

use thiserror::Error;
use uuid::Uuid;

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Task layer error types.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Queue database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task absent from the queue
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// No handler registered for a task kind
    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    /// Handler failure (retryable; the queue applies backoff)
    #[error("execution error: {0}")]
    Execution(String),

    /// Handler exceeded the execution timeout
    #[error("task timed out after {seconds}s")]
    Timeout {
        /// Configured timeout that was exceeded
        seconds: u64,
    },

    /// Invalid configuration or corrupt queue row
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Conversation memory error bubbling out of a handler
    #[error("memory error: {0}")]
    Memory(#[from] parley_memory::MemoryError),
}

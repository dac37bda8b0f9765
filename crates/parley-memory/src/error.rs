//! Error types for the conversation memory layer.

use thiserror::Error;

/// Errors surfaced by the durable store and the memory coordinator.
///
/// Only `NotFound`, `VersionConflict` (and its exhaustion variant) and
/// `Store` are ever visible to request handlers; cache failures are a
/// separate type ([`CacheError`]) absorbed inside the coordinator.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Conversation absent from the durable store
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency guard failed; the caller must re-read and retry
    #[error("version conflict on {conversation_id}: expected {expected}, stored {actual}")]
    VersionConflict {
        /// Conversation the write raced on
        conversation_id: String,
        /// Version the writer expected
        expected: i64,
        /// Version actually stored
        actual: i64,
    },

    /// Bounded conflict retry loop gave up
    #[error("interaction on {conversation_id} still conflicted after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Conversation the writes raced on
        conversation_id: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Durable store error (fatal for the current request)
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal error
    #[error("{0}")]
    Internal(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Cache-layer failure.
///
/// Every cache operation degrades to this instead of raising a fatal
/// error, so the coordinator can fall back to the durable store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache backend unreachable, timed out, or returned garbage
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

//! Tunable parameters for the memory layer.
//!
//! TTLs, window sizes and retry bounds are deployment policy, not code;
//! everything here deserializes from the application config file with
//! sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the memory coordinator and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// TTL for cached conversation snapshots and message windows, in seconds
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,
    /// TTL for cached classification results, in seconds
    #[serde(default = "default_classification_ttl_secs")]
    pub classification_ttl_secs: u64,
    /// Maximum messages kept in the cached sliding window
    #[serde(default = "default_message_window")]
    pub message_window: usize,
    /// How recently a conversation must have been touched to be continued
    /// instead of opening a new one, in seconds
    #[serde(default = "default_active_window_secs")]
    pub active_window_secs: u64,
    /// How many times a version-conflicted write is retried before surfacing
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
    /// Upper bound on any single cache operation, in milliseconds
    #[serde(default = "default_cache_op_timeout_ms")]
    pub cache_op_timeout_ms: u64,
}

fn default_conversation_ttl_secs() -> u64 {
    4 * 3600
}

fn default_classification_ttl_secs() -> u64 {
    30 * 60
}

fn default_message_window() -> usize {
    50
}

fn default_active_window_secs() -> u64 {
    4 * 3600
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_cache_op_timeout_ms() -> u64 {
    2000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            conversation_ttl_secs: default_conversation_ttl_secs(),
            classification_ttl_secs: default_classification_ttl_secs(),
            message_window: default_message_window(),
            active_window_secs: default_active_window_secs(),
            conflict_retries: default_conflict_retries(),
            cache_op_timeout_ms: default_cache_op_timeout_ms(),
        }
    }
}

impl MemoryConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conversation TTL.
    pub fn with_conversation_ttl_secs(mut self, secs: u64) -> Self {
        self.conversation_ttl_secs = secs;
        self
    }

    /// Set the sliding-window size.
    pub fn with_message_window(mut self, window: usize) -> Self {
        self.message_window = window;
        self
    }

    /// Set the active-conversation continuation window.
    pub fn with_active_window_secs(mut self, secs: u64) -> Self {
        self.active_window_secs = secs;
        self
    }

    /// Set the version-conflict retry bound.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Conversation TTL as a [`Duration`].
    pub fn conversation_ttl(&self) -> Duration {
        Duration::from_secs(self.conversation_ttl_secs)
    }

    /// Classification TTL as a [`Duration`].
    pub fn classification_ttl(&self) -> Duration {
        Duration::from_secs(self.classification_ttl_secs)
    }

    /// Active-conversation window as a chrono [`chrono::Duration`].
    pub fn active_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.active_window_secs as i64)
    }

    /// Cache operation timeout as a [`Duration`].
    pub fn cache_op_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_op_timeout_ms)
    }
}

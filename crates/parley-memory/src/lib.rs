//! Parley Memory — tiered conversation memory for the support backend.
//!
//! A cache-aside Redis front over a SQLite source of truth, reconciled
//! by a single coordinator:
//!
//! ```text
//! request ──► ConversationMemory ──► ConversationCache (Redis, TTL)
//!                    │                      │ miss / unavailable
//!                    └──────────────► ConversationStore (SQLite)
//! ```
//!
//! Reads check the cache and repopulate it on miss; writes go through
//! the durable store under an optimistic version guard and then update
//! the cache. A down cache degrades to store-only reads, never to a
//! failed request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod types;

pub use cache::{ConversationCache, MemoryCache, RedisCache};
pub use classifier::{ClassificationOutcome, CollaboratorError, SupportResponder};
pub use config::MemoryConfig;
pub use coordinator::{ConversationMemory, MemoryHealth};
pub use error::{CacheError, CacheResult, MemoryError, Result};
pub use store::ConversationStore;
pub use types::{
    ArticleUsage, ClassificationRecord, Conversation, ConversationContext, ConversationStatus,
    ConversationSummary, InteractionMetadata, Message, MessageRole, NewMessage,
};

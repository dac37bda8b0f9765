//! Parley Tasks — deferred work for the support backend.
//!
//! Slow or non-critical work (escalation notices, summaries, index
//! refreshes, purges) is handed off to a durable, lane-prioritized
//! queue and executed by a fixed pool of retrying workers; a scheduler
//! injects recurring maintenance tasks into the same queue:
//!
//! ```text
//! request ──► TaskQueue (SQLite, lanes, backoff) ──► WorkerPool
//!                  ▲                                    │
//!             Scheduler (fixed calendar)          HandlerRegistry
//!                                                       │
//!                                              ConversationMemory
//! ```
//!
//! Failed deliveries are rescheduled with exponential backoff until the
//! delivery budget runs out, then kept as dead letters for inspection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod queue;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use error::{Result, TaskError};
pub use handlers::{
    builtin_registry, EscalationNotice, GenerateSummaryHandler, KnowledgeIndex, LogNotifier,
    Notifier, NotifyEscalationHandler, PurgeOldConversationsHandler, RefreshIndexHandler,
    Summarizer,
};
pub use queue::{QueueConfig, TaskQueue};
pub use scheduler::{default_calendar, ScheduleEntry, Scheduler, SchedulerConfig, Trigger};
pub use types::{
    EscalationPayload, Lane, PurgePayload, RefreshIndexPayload, SummaryPayload, Task, TaskKind,
    TaskStatus,
};
pub use worker::{HandlerRegistry, TaskHandler, WorkerConfig, WorkerPool};

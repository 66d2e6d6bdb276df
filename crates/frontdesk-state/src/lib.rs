//! Frontdesk State - Conversation model and tiered state store
//!
//! This crate owns the `ConversationState` aggregate and its persistence:
//! - Model: the conversation aggregate and its append-only audit records
//! - Store: the versioned `ConversationStore` contract with optimistic
//!   concurrency (compare-and-swap saves, no locks held across turns)
//! - Tiers: in-process cache → Redis → SQLite, read-through on load and
//!   write-through on save

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod model;
pub mod redis_cache;
pub mod sqlite;
pub mod store;
pub mod tiered;

pub use error::{Result, StateError};
pub use memory::{MemoryBackend, MemoryCache};
pub use model::{
    ContextSnapshot, ConversationState, ConversationStatus, ConversationTurn, CustomerSnapshot,
    CustomerTier, EscalationRecord, HandlerKind, ResolutionAttempt, Sentiment, Speaker,
    ToolInvocationRecord, ToolOutcome,
};
pub use redis_cache::RedisCache;
pub use sqlite::SqliteStore;
pub use store::{CacheTier, ConversationStore};
pub use tiered::TieredStore;

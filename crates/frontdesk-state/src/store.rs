//! Storage contracts
//!
//! Two traits split the store: `ConversationStore` is the versioned durable
//! contract the engine programs against, and `CacheTier` is the lossy
//! fast-read contract the tiered store layers on top. Cache tiers may drop
//! or expire entries at any time; the durable store is authoritative.

use crate::error::Result;
use crate::model::ConversationState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Versioned conversation storage.
///
/// `save` is a compare-and-swap on `(conversation_id, expected_version)`:
/// pass `expected_version = 0` to create, or the version the state was
/// loaded at to update. A successful save returns the new version, which is
/// always `expected_version + 1`. A stale expectation fails with
/// [`StateError::VersionConflict`](crate::StateError::VersionConflict) and
/// applies nothing.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the current state for a conversation.
    async fn load(&self, conversation_id: &str) -> Result<ConversationState>;

    /// Persist `state` if the stored version still equals
    /// `expected_version`. Returns the new version.
    async fn save(&self, state: &ConversationState, expected_version: u64) -> Result<u64>;

    /// Flag the durable record for the external retention job. The record
    /// itself is retained; archived conversations stop appearing in idle
    /// listings.
    async fn archive(&self, conversation_id: &str) -> Result<()>;

    /// Conversation ids whose last activity predates `cutoff`, excluding
    /// archived and closed records.
    async fn list_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// A fast, lossy read tier in front of the durable store.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Fetch a cached state, if present and fresh.
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>>;

    /// Insert or replace the cached state.
    async fn put(&self, state: &ConversationState) -> Result<()>;

    /// Drop the cached entry, if any.
    async fn evict(&self, conversation_id: &str) -> Result<()>;
}

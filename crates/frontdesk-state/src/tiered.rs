//! Tiered store composition
//!
//! Read path: in-process cache → shared (Redis) tier → durable store, with
//! each miss populating the tiers above it. Write path is write-through:
//! the durable compare-and-swap runs first and is authoritative; cache tier
//! updates happen only after durable success, and a cache failure never
//! fails the save.

use crate::error::{Result, StateError};
use crate::memory::MemoryCache;
use crate::model::{ConversationState, ConversationStatus};
use crate::store::{CacheTier, ConversationStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tiered conversation store.
pub struct TieredStore {
    local: MemoryCache,
    shared: Option<Arc<dyn CacheTier>>,
    durable: Arc<dyn ConversationStore>,
}

impl TieredStore {
    /// Build a store over a durable backend, with only the in-process tier.
    #[must_use]
    pub fn new(durable: Arc<dyn ConversationStore>) -> Self {
        Self {
            local: MemoryCache::new(),
            shared: None,
            durable,
        }
    }

    /// Add a shared cache tier between the in-process cache and the
    /// durable store.
    #[must_use]
    pub fn with_shared_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.shared = Some(tier);
        self
    }

    /// Replace the in-process tier (e.g. to tune its freshness window).
    #[must_use]
    pub fn with_local_cache(mut self, cache: MemoryCache) -> Self {
        self.local = cache;
        self
    }

    /// Drop a conversation from the fast tiers, leaving the durable record.
    pub async fn evict_fast_tiers(&self, conversation_id: &str) {
        if let Err(e) = self.local.evict(conversation_id).await {
            warn!(conversation_id = %conversation_id, error = %e, "local cache evict failed");
        }
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.evict(conversation_id).await {
                warn!(conversation_id = %conversation_id, error = %e, "shared cache evict failed");
            }
        }
    }

    /// Close conversations idle longer than `idle_timeout` and evict them
    /// from the fast tiers. Returns how many were closed.
    ///
    /// Closure goes through the same versioned save as any other write, so
    /// a sweep racing an active turn loses the version race and leaves that
    /// conversation alone. Timeout closure is the one path that closes a
    /// conversation that never reached `resolved`.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> Result<usize> {
        let cutoff = Utc::now() - idle_timeout;
        let ids = self.durable.list_idle_before(cutoff).await?;
        let mut closed = 0usize;

        for id in ids {
            let mut state = match self.durable.load(&id).await {
                Ok(state) => state,
                Err(StateError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(conversation_id = %id, error = %e, "sweep load failed");
                    continue;
                }
            };
            if state.status.is_terminal() {
                continue;
            }

            let expected = state.version;
            state.status = ConversationStatus::Closed;
            match self.durable.save(&state, expected).await {
                Ok(_) => {
                    self.evict_fast_tiers(&id).await;
                    closed += 1;
                }
                Err(StateError::VersionConflict { .. }) => {
                    // An active turn got there first; the conversation is
                    // not idle after all.
                    debug!(conversation_id = %id, "sweep lost version race, skipping");
                }
                Err(e) => {
                    warn!(conversation_id = %id, error = %e, "sweep close failed");
                }
            }
        }

        if closed > 0 {
            info!(closed = closed, "idle conversations reclaimed");
        }
        Ok(closed)
    }

    async fn populate_local(&self, state: &ConversationState) {
        if let Err(e) = self.local.put(state).await {
            warn!(conversation_id = %state.conversation_id, error = %e, "local cache update failed");
        }
    }

    async fn populate_shared(&self, state: &ConversationState) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.put(state).await {
                warn!(conversation_id = %state.conversation_id, error = %e, "shared cache update failed");
            }
        }
    }
}

#[async_trait]
impl ConversationStore for TieredStore {
    async fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        if let Some(state) = self.local.get(conversation_id).await? {
            debug!(conversation_id = %conversation_id, "hit in-process tier");
            return Ok(state);
        }

        if let Some(shared) = &self.shared {
            match shared.get(conversation_id).await {
                Ok(Some(state)) => {
                    debug!(conversation_id = %conversation_id, "hit shared tier");
                    self.populate_local(&state).await;
                    return Ok(state);
                }
                Ok(None) => {}
                Err(e) => {
                    // Shared tier trouble degrades to a durable read.
                    warn!(conversation_id = %conversation_id, error = %e, "shared tier read failed");
                }
            }
        }

        let state = self.durable.load(conversation_id).await?;
        self.populate_shared(&state).await;
        self.populate_local(&state).await;
        Ok(state)
    }

    async fn save(&self, state: &ConversationState, expected_version: u64) -> Result<u64> {
        match self.durable.save(state, expected_version).await {
            Ok(new_version) => {
                let mut cached = state.clone();
                cached.version = new_version;
                self.populate_shared(&cached).await;
                self.populate_local(&cached).await;
                Ok(new_version)
            }
            Err(e @ StateError::VersionConflict { .. }) => {
                // The cached copy is stale; make sure the caller's reload
                // sees the authoritative state.
                self.evict_fast_tiers(&state.conversation_id).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn archive(&self, conversation_id: &str) -> Result<()> {
        self.durable.archive(conversation_id).await?;
        self.evict_fast_tiers(conversation_id).await;
        Ok(())
    }

    async fn list_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        self.durable.list_idle_before(cutoff).await
    }
}

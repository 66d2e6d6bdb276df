//! In-memory backends
//!
//! `MemoryBackend` implements the full durable contract against a process
//! map — for development and tests, where it gives deterministic
//! compare-and-swap semantics without a database file. `MemoryCache` is the
//! in-process cache tier used as the first read layer of the tiered store.

use crate::error::{Result, StateError};
use crate::model::ConversationState;
use crate::store::{CacheTier, ConversationStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

struct DurableEntry {
    state: ConversationState,
    archived: bool,
}

/// Durable-contract store backed by process memory.
///
/// Data is lost on restart; use [`SqliteStore`](crate::SqliteStore) outside
/// of tests. Versioning behaves identically to the SQLite backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, DurableEntry>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations, archived included.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryBackend {
    async fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        let entries = self.entries.read().await;
        entries
            .get(conversation_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| StateError::NotFound(conversation_id.to_string()))
    }

    async fn save(&self, state: &ConversationState, expected_version: u64) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let actual = entries
            .get(&state.conversation_id)
            .map(|e| e.state.version)
            .unwrap_or(0);

        if actual != expected_version {
            return Err(StateError::VersionConflict {
                conversation_id: state.conversation_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        let mut next = state.clone();
        next.version = expected_version + 1;
        let new_version = next.version;

        let archived = entries
            .get(&state.conversation_id)
            .map(|e| e.archived)
            .unwrap_or(false);
        entries.insert(
            state.conversation_id.clone(),
            DurableEntry {
                state: next,
                archived,
            },
        );

        debug!(conversation_id = %state.conversation_id, version = new_version, "state saved");
        Ok(new_version)
    }

    async fn archive(&self, conversation_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(conversation_id) {
            Some(entry) => {
                entry.archived = true;
                Ok(())
            }
            None => Err(StateError::NotFound(conversation_id.to_string())),
        }
    }

    async fn list_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| {
                !e.archived && !e.state.status.is_terminal() && e.state.last_activity < cutoff
            })
            .map(|e| e.state.conversation_id.clone())
            .collect())
    }
}

struct CachedState {
    state: ConversationState,
    cached_at: DateTime<Utc>,
}

/// Default freshness window for in-process cache entries.
const DEFAULT_MAX_AGE_SECS: i64 = 300;

/// In-process cache tier.
///
/// Entries expire after a freshness window rather than being invalidated
/// across processes; the optimistic version check on save catches anything
/// stale that slips through.
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CachedState>>>,
    max_age: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create a cache with the default freshness window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_age: Duration::seconds(DEFAULT_MAX_AGE_SECS),
        }
    }

    /// Create a cache with a custom freshness window.
    #[must_use]
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_age,
        }
    }

    /// Current number of cached entries, stale ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let entries = self.entries.read().await;
        match entries.get(conversation_id) {
            Some(cached) if Utc::now() - cached.cached_at < self.max_age => {
                Ok(Some(cached.state.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, state: &ConversationState) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            state.conversation_id.clone(),
            CachedState {
                state: state.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn evict(&self, conversation_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationStatus;

    #[tokio::test]
    async fn save_increments_version_strictly() {
        let store = MemoryBackend::new();
        let mut state = ConversationState::new("conv-1");

        let v1 = store.save(&state, 0).await.unwrap();
        assert_eq!(v1, 1);
        state.version = v1;

        state.push_customer_turn("hello");
        let v2 = store.save(&state, v1).await.unwrap();
        assert_eq!(v2, 2);

        let loaded = store.load("conv-1").await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn stale_save_conflicts_without_applying() {
        let store = MemoryBackend::new();
        let state = ConversationState::new("conv-2");
        store.save(&state, 0).await.unwrap();

        let mut stale = store.load("conv-2").await.unwrap();
        stale.push_customer_turn("first writer");
        store.save(&stale, 1).await.unwrap();

        let mut loser = state.clone();
        loser.push_customer_turn("second writer");
        let err = store.save(&loser, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        // The losing write left no trace.
        let loaded = store.load("conv-2").await.unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].text, "first writer");
    }

    #[tokio::test]
    async fn concurrent_saves_admit_exactly_one_winner() {
        let store = Arc::new(MemoryBackend::new());
        let state = ConversationState::new("conv-3");
        store.save(&state, 0).await.unwrap();

        let base = store.load("conv-3").await.unwrap();
        let mut handles = Vec::new();
        for i in 0..4 {
            let store = Arc::clone(&store);
            let mut candidate = base.clone();
            handles.push(tokio::spawn(async move {
                candidate.push_customer_turn(format!("writer {i}"));
                store.save(&candidate, 1).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(v) => {
                    assert_eq!(v, 2);
                    wins += 1;
                }
                Err(StateError::VersionConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 3);
    }

    #[tokio::test]
    async fn idle_listing_skips_archived_and_closed() {
        let store = MemoryBackend::new();

        let mut idle = ConversationState::new("idle");
        idle.last_activity = Utc::now() - Duration::hours(2);
        store.save(&idle, 0).await.unwrap();

        let mut closed = ConversationState::new("closed");
        closed.last_activity = Utc::now() - Duration::hours(2);
        closed.status = ConversationStatus::Closed;
        store.save(&closed, 0).await.unwrap();

        let mut archived = ConversationState::new("archived");
        archived.last_activity = Utc::now() - Duration::hours(2);
        store.save(&archived, 0).await.unwrap();
        store.archive("archived").await.unwrap();

        let active = ConversationState::new("active");
        store.save(&active, 0).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        let ids = store.list_idle_before(cutoff).await.unwrap();
        assert_eq!(ids, vec!["idle".to_string()]);
    }

    #[tokio::test]
    async fn cache_expires_by_freshness_window() {
        let cache = MemoryCache::with_max_age(Duration::milliseconds(0));
        let state = ConversationState::new("conv-4");
        cache.put(&state).await.unwrap();

        // Zero freshness window: entry is immediately stale.
        assert!(cache.get("conv-4").await.unwrap().is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn cache_round_trip_and_evict() {
        let cache = MemoryCache::new();
        let state = ConversationState::new("conv-5");
        cache.put(&state).await.unwrap();

        let hit = cache.get("conv-5").await.unwrap().unwrap();
        assert_eq!(hit.conversation_id, "conv-5");

        cache.evict("conv-5").await.unwrap();
        assert!(cache.get("conv-5").await.unwrap().is_none());
    }
}

//! Redis cache tier
//!
//! Shared low-latency tier between the in-process cache and the durable
//! store. Entries carry a TTL so the tier self-evicts; consistency is
//! guaranteed by the durable store's version check, not by invalidation.

use crate::error::{Result, StateError};
use crate::model::ConversationState;
use crate::store::CacheTier;
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_PREFIX: &str = "frontdesk:conv:";
const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Redis-backed cache tier.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisCache {
    /// Connect with the default key prefix and a one-hour TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid.
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_options(redis_url, DEFAULT_PREFIX, DEFAULT_TTL_SECONDS)
    }

    /// Connect with a custom prefix and TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid.
    pub fn with_options(redis_url: &str, prefix: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StateError::Storage(format!("invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            ttl_seconds,
        })
    }

    fn build_key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.prefix, conversation_id)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StateError::Storage(format!("Redis connection failed: {e}")))
    }
}

#[async_trait]
impl CacheTier for RedisCache {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let mut conn = self.get_connection().await?;
        let key = self.build_key(conversation_id);

        let data: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateError::Storage(format!("Redis GET failed: {e}")))?;

        match data {
            Some(json) => {
                let state: ConversationState = serde_json::from_str(&json)?;
                debug!(conversation_id = %conversation_id, "conversation loaded from Redis tier");
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, state: &ConversationState) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.build_key(&state.conversation_id);
        let json = serde_json::to_string(state)?;

        redis::cmd("SETEX")
            .arg(&key)
            .arg(self.ttl_seconds)
            .arg(&json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateError::Storage(format!("Redis SETEX failed: {e}")))?;

        debug!(conversation_id = %state.conversation_id, ttl = self.ttl_seconds, "conversation cached in Redis tier");
        Ok(())
    }

    async fn evict(&self, conversation_id: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.build_key(conversation_id);

        redis::cmd("DEL")
            .arg(&key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateError::Storage(format!("Redis DEL failed: {e}")))?;
        Ok(())
    }
}

// Redis tests require a running instance.
// Run with: cargo test --features redis-tests
#[cfg(all(test, feature = "redis-tests"))]
mod redis_tests {
    use super::*;

    #[tokio::test]
    async fn redis_tier_round_trip() {
        let cache = RedisCache::new("redis://127.0.0.1:6379").unwrap();

        let state = ConversationState::new("redis-test-conv");
        cache.put(&state).await.unwrap();

        let loaded = cache.get("redis-test-conv").await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id, "redis-test-conv");

        cache.evict("redis-test-conv").await.unwrap();
        assert!(cache.get("redis-test-conv").await.unwrap().is_none());
    }
}

//! SQLite durable store
//!
//! The authoritative backend. One row per conversation, with the serialized
//! aggregate in `state_data` and the version duplicated into its own column
//! so the compare-and-swap can run as a single conditional statement.

use crate::error::{Result, StateError};
use crate::model::ConversationState;
use crate::store::ConversationStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed conversation store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or migrated.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StateError::Storage(format!("failed to create database directory: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StateError::Storage(format!("invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StateError::Storage(format!("failed to connect to SQLite: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;

        info!(path = %path.display(), "SQLite conversation store initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,
                state_data TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Storage(format!("failed to create conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_conversations_last_activity
                ON conversations(last_activity)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Storage(format!("failed to create index: {e}")))?;

        debug!("conversation schema initialized");
        Ok(())
    }

    /// Verify the database answers queries.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Storage(format!("health check failed: {e}")))?;
        Ok(())
    }

    async fn current_version(&self, conversation_id: &str) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM conversations WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StateError::Storage(format!("failed to read version: {e}")))?;
        Ok(row.map(|(v,)| v as u64).unwrap_or(0))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_data FROM conversations WHERE conversation_id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StateError::Storage(format!("failed to load conversation: {e}")))?;

        match row {
            Some((data,)) => {
                let state: ConversationState = serde_json::from_str(&data)?;
                debug!(conversation_id = %conversation_id, version = state.version, "conversation loaded from SQLite");
                Ok(state)
            }
            None => Err(StateError::NotFound(conversation_id.to_string())),
        }
    }

    async fn save(&self, state: &ConversationState, expected_version: u64) -> Result<u64> {
        let mut next = state.clone();
        next.version = expected_version + 1;

        let data = serde_json::to_string(&next)?;
        let now = Utc::now().to_rfc3339();
        let last_activity = next.last_activity.to_rfc3339();

        let rows = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversations
                    (conversation_id, version, status, state_data, last_activity, created_at, updated_at)
                VALUES (?, 1, ?, ?, ?, ?, ?)
                ON CONFLICT(conversation_id) DO NOTHING
                "#,
            )
            .bind(&next.conversation_id)
            .bind(next.status.as_str())
            .bind(&data)
            .bind(&last_activity)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Storage(format!("failed to insert conversation: {e}")))?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE conversations
                SET version = ?, status = ?, state_data = ?, last_activity = ?, updated_at = ?
                WHERE conversation_id = ? AND version = ?
                "#,
            )
            .bind(next.version as i64)
            .bind(next.status.as_str())
            .bind(&data)
            .bind(&last_activity)
            .bind(&now)
            .bind(&next.conversation_id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Storage(format!("failed to update conversation: {e}")))?
            .rows_affected()
        };

        if rows == 0 {
            let actual = self.current_version(&next.conversation_id).await?;
            return Err(StateError::VersionConflict {
                conversation_id: next.conversation_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        debug!(conversation_id = %next.conversation_id, version = next.version, "conversation saved to SQLite");
        Ok(next.version)
    }

    async fn archive(&self, conversation_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET archived = 1 WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Storage(format!("failed to archive conversation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(conversation_id.to_string()));
        }
        debug!(conversation_id = %conversation_id, "conversation archived");
        Ok(())
    }

    async fn list_idle_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT conversation_id FROM conversations
            WHERE last_activity < ? AND archived = 0 AND status != 'closed'
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateError::Storage(format!("failed to list idle conversations: {e}")))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationStatus;
    use chrono::Duration;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_conversations.db");
        let store = SqliteStore::new(&db_path).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let (store, _temp) = create_test_store().await;

        let mut state = ConversationState::new("conv-1");
        state.push_customer_turn("where is my invoice?");
        let v1 = store.save(&state, 0).await.unwrap();
        assert_eq!(v1, 1);

        let loaded = store.load("conv-1").await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.history.len(), 1);

        let mut updated = loaded;
        updated.push_customer_turn("hello?");
        let v2 = store.save(&updated, v1).await.unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let (store, _temp) = create_test_store().await;
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let (store, _temp) = create_test_store().await;

        let state = ConversationState::new("conv-2");
        store.save(&state, 0).await.unwrap();
        let fresh = store.load("conv-2").await.unwrap();
        store.save(&fresh, 1).await.unwrap();

        let err = store.save(&fresh, 1).await.unwrap_err();
        match err {
            StateError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let (store, _temp) = create_test_store().await;

        let state = ConversationState::new("conv-3");
        store.save(&state, 0).await.unwrap();

        let err = store.save(&state, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn update_of_missing_row_conflicts_at_zero() {
        let (store, _temp) = create_test_store().await;
        let state = ConversationState::new("ghost");
        let err = store.save(&state, 5).await.unwrap_err();
        assert!(matches!(
            err,
            StateError::VersionConflict {
                expected: 5,
                actual: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn idle_listing_and_archive() {
        let (store, _temp) = create_test_store().await;

        let mut idle = ConversationState::new("idle");
        idle.last_activity = Utc::now() - Duration::hours(3);
        store.save(&idle, 0).await.unwrap();

        let mut closed = ConversationState::new("closed");
        closed.last_activity = Utc::now() - Duration::hours(3);
        closed.status = ConversationStatus::Closed;
        store.save(&closed, 0).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(1);
        assert_eq!(
            store.list_idle_before(cutoff).await.unwrap(),
            vec!["idle".to_string()]
        );

        store.archive("idle").await.unwrap();
        assert!(store.list_idle_before(cutoff).await.unwrap().is_empty());

        // The archived record is retained, not deleted.
        assert!(store.load("idle").await.is_ok());
    }

    #[tokio::test]
    async fn health_check_passes() {
        let (store, _temp) = create_test_store().await;
        store.health_check().await.unwrap();
    }
}

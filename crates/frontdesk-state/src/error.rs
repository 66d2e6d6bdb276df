//! Error types for frontdesk-state

use thiserror::Error;

/// State store error type
#[derive(Debug, Error)]
pub enum StateError {
    /// No durable record exists for the conversation id
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// A save raced another writer; the caller must reload and retry
    #[error("version conflict on {conversation_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Conversation the save targeted
        conversation_id: String,
        /// Version the caller based its mutation on
        expected: u64,
        /// Version the durable store actually holds
        actual: u64,
    },

    /// State could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure (SQLite, Redis, connection)
    #[error("storage error: {0}")]
    Storage(String),
}

impl StateError {
    /// True for errors the caller can resolve by reloading and retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StateError>;

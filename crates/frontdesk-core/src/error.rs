//! Error types for frontdesk-core
//!
//! Tool and classification failures never appear here — the engine absorbs
//! them into state so the audit trail reflects what was attempted. Only
//! store conflicts, invariant violations, and caller mistakes surface.

use frontdesk_state::{ConversationStatus, StateError};
use frontdesk_tools::ToolError;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown conversation id — a client error
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// A status change outside the state machine table — an internal
    /// invariant violation; the turn is aborted without a partial write
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the conversation was in
        from: ConversationStatus,
        /// Status the transition targeted
        to: ConversationStatus,
    },

    /// The optimistic save lost its race twice; the caller may retry the
    /// whole request
    #[error("transient conflict: {0}")]
    Conflict(String),

    /// Bad policy or engine configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// State store failure other than not-found
    #[error("state store error: {0}")]
    State(StateError),

    /// Tool dispatch failure (unknown tool or bad registration)
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(id) => Self::NotFound(id),
            other => Self::State(other),
        }
    }
}

impl EngineError {
    /// True when retrying the whole request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

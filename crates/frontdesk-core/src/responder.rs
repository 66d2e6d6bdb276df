//! Handler response boundary
//!
//! Domain-specific response generation is external; the engine asks the
//! responder what the active handler says and which tools it wants, then
//! owns the dispatching, auditing, and state transitions itself.

use frontdesk_state::{ConversationState, HandlerKind};
use serde::{Deserialize, Serialize};

/// A tool the handler wants dispatched on its behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Registered tool name
    pub tool: String,
    /// Parameters for the call
    pub parameters: serde_json::Value,
}

/// The handler's contribution to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerReply {
    /// Text shown to the customer
    pub text: String,
    /// Tools to dispatch, in order
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
    /// Handler's confidence in this attempt
    pub confidence: f64,
    /// Whether the handler considers the issue addressed
    pub resolved: bool,
    /// Whether the handler is waiting on the customer
    pub needs_customer: bool,
    /// Short outcome note for the resolution attempt record
    pub outcome_note: String,
}

impl HandlerReply {
    /// A plain text reply with no tools and no resolution claim.
    #[must_use]
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_requests: Vec::new(),
            confidence: 0.0,
            resolved: false,
            needs_customer: false,
            outcome_note: String::new(),
        }
    }
}

/// External response-generation collaborator, one per deployment.
#[async_trait::async_trait]
pub trait HandlerResponder: Send + Sync {
    /// Produce the active handler's reply for the current turn.
    async fn respond(
        &self,
        handler: HandlerKind,
        state: &ConversationState,
    ) -> anyhow::Result<HandlerReply>;
}

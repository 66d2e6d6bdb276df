//! Conversation status state machine
//!
//! The transition table is closed: anything not listed is rejected as an
//! invariant violation. Idle-timeout closure bypasses this table at the
//! store level; every engine-driven change goes through [`transition`].

use crate::error::{EngineError, Result};
use frontdesk_state::{ConversationState, ConversationStatus};
use tracing::{debug, error};

use ConversationStatus::{Closed, Escalated, InProgress, New, PendingCustomer, Resolved};

/// Whether `from -> to` is a valid status transition.
#[must_use]
pub fn can_transition(from: ConversationStatus, to: ConversationStatus) -> bool {
    matches!(
        (from, to),
        (New, InProgress)
            | (InProgress, PendingCustomer)
            | (InProgress, Escalated)
            | (InProgress, Resolved)
            | (PendingCustomer, InProgress)
            | (Escalated, InProgress)
            | (Escalated, Resolved)
            | (Resolved, Closed)
    )
}

/// Apply a status transition, rejecting anything outside the table.
pub fn transition(state: &mut ConversationState, to: ConversationStatus) -> Result<()> {
    let from = state.status;
    if !can_transition(from, to) {
        error!(
            conversation_id = %state.conversation_id,
            from = %from,
            to = %to,
            "rejected invalid status transition"
        );
        return Err(EngineError::InvalidTransition { from, to });
    }
    debug!(conversation_id = %state.conversation_id, from = %from, to = %to, "status transition");
    state.status = to;
    Ok(())
}

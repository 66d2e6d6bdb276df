//! Routing score computation and escalation paths
//!
//! Scoring is a pure function over the policy's declared weight tables, so
//! routing decisions are unit-testable without any collaborator. Handler
//! selection is deterministic: equal scores resolve by the policy's
//! tie-break ordering, later entry winning.

use crate::policy::RoutingPolicy;
use frontdesk_state::{ConversationState, CustomerTier, HandlerKind};
use tracing::debug;

/// Score one candidate handler for the conversation's current turn.
///
/// `effective_tier` is the customer tier when a fresh profile snapshot
/// exists; a stale or missing snapshot degrades the multiplier to neutral.
#[must_use]
pub fn score_handler(
    policy: &RoutingPolicy,
    state: &ConversationState,
    effective_tier: Option<CustomerTier>,
    handler: HandlerKind,
) -> f64 {
    let category = policy.categorize(&state.current_intent);

    let intent_weight = policy
        .intent_weights
        .get(category)
        .and_then(|m| m.get(&handler))
        .copied()
        .unwrap_or(0.0);

    let tier_multiplier = effective_tier
        .and_then(|tier| policy.tier_multipliers.get(&tier))
        .and_then(|m| m.get(&handler))
        .copied()
        .unwrap_or(1.0);

    let mut penalty_drivers = f64::from(state.escalation_level) * policy.level_factor
        + state.failed_attempts() as f64 * policy.attempt_factor;
    if state.sentiment.is_negative() {
        penalty_drivers += policy.frustration_penalty;
    }
    if state.sla_breach_risk {
        penalty_drivers += policy.sla_penalty;
    }

    let susceptibility = policy
        .de_escalation_weight
        .get(&handler)
        .copied()
        .unwrap_or(0.0);

    intent_weight * tier_multiplier - susceptibility * penalty_drivers
}

/// Select the best handler for the current turn.
///
/// Candidates come from the tie-break list; on equal scores the later
/// (more specialized) entry wins, which keeps repeated runs identical.
#[must_use]
pub fn select_handler(
    policy: &RoutingPolicy,
    state: &ConversationState,
    effective_tier: Option<CustomerTier>,
) -> HandlerKind {
    let mut best = *policy.tie_break.first().unwrap_or(&HandlerKind::Tier1);
    let mut best_score = f64::NEG_INFINITY;

    for &candidate in &policy.tie_break {
        let score = score_handler(policy, state, effective_tier, candidate);
        if score >= best_score {
            best = candidate;
            best_score = score;
        }
    }

    debug!(
        conversation_id = %state.conversation_id,
        handler = %best,
        score = best_score,
        "handler selected"
    );
    best
}

/// Next handler up the escalation ladder.
///
/// `level` indexes into the path declared for the current handler; past
/// the end, the supervisor catches everything. Once the level cap is
/// reached, or a person was already demanded, the conversation leaves the
/// automated flow.
#[must_use]
pub fn escalation_target(
    current: HandlerKind,
    level: u32,
    requires_human: bool,
    max_level: u32,
) -> HandlerKind {
    use HandlerKind::{Billing, Clarification, HumanHandoff, Sales, Supervisor, Tier1, Tier2, Tier3};

    if requires_human || level >= max_level {
        return HumanHandoff;
    }

    let path: &[HandlerKind] = match current {
        Tier1 => &[Tier2, Supervisor],
        Tier2 => &[Tier3, Supervisor],
        Tier3 | Sales | Billing | Clarification => &[Supervisor],
        Supervisor | HumanHandoff => &[HumanHandoff],
    };

    path.get(level as usize).copied().unwrap_or(Supervisor)
}

/// Derive the reason string for an escalation record from the state's
/// trigger conditions. Multiple triggers join comma-separated.
#[must_use]
pub fn escalation_reasons(
    state: &ConversationState,
    explicit_request: bool,
    attempts_exhausted: bool,
) -> String {
    let mut reasons = Vec::new();
    if explicit_request {
        reasons.push("customer_requested_escalation");
    }
    if attempts_exhausted {
        reasons.push("multiple_failed_attempts");
    }
    if state.sentiment.is_negative() {
        reasons.push("negative_customer_sentiment");
    }
    if state.sla_breach_risk {
        reasons.push("sla_breach_risk");
    }
    if state
        .customer
        .as_ref()
        .is_some_and(|c| c.tier == CustomerTier::Platinum)
    {
        reasons.push("vip_customer_escalation");
    }
    if reasons.is_empty() {
        reasons.push("routing_selected_escalation_target");
    }
    reasons.join(", ")
}

//! Routing & escalation engine
//!
//! One call per inbound message: load state, classify, route, run the
//! handler, dispatch its tools, append the audit records, and persist the
//! new version. Collaborator failures are absorbed into state — the
//! customer always gets a response — and only store conflicts and
//! invariant violations surface to the caller.

use crate::classify::{Classification, Classifier};
use crate::error::{EngineError, Result};
use crate::machine;
use crate::policy::EngineConfig;
use crate::profile::ProfileSource;
use crate::responder::{HandlerReply, HandlerResponder};
use crate::routing;
use chrono::{DateTime, Duration, Utc};
use frontdesk_state::{
    ConversationState, ConversationStatus, ConversationStore, CustomerTier, HandlerKind,
    ResolutionAttempt, Sentiment, StateError,
};
use frontdesk_tools::Dispatcher;
use regex::Regex;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// What the transport layer gets back for one processed message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Text to show the customer
    pub response_text: String,
    /// Conversation status after the turn
    pub status: ConversationStatus,
    /// Handler that produced the response
    pub handler: HandlerKind,
    /// Whether this turn recorded an escalation
    pub escalated: bool,
}

/// Read-only view of a conversation for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub conversation_id: String,
    /// Current status
    pub status: ConversationStatus,
    /// Handler currently responsible
    pub handler: HandlerKind,
    /// Escalation level
    pub escalation_level: u32,
    /// Latest sentiment
    pub sentiment: Sentiment,
    /// Whether a person must take over
    pub requires_human: bool,
    /// Whether the SLA window is at risk
    pub sla_breach_risk: bool,
    /// Transcript length
    pub turns: usize,
    /// Resolution attempts so far
    pub resolution_attempts: usize,
    /// Last activity timestamp
    pub last_activity: DateTime<Utc>,
}

/// The conversation orchestration engine.
pub struct Engine {
    store: Arc<dyn ConversationStore>,
    dispatcher: Arc<Dispatcher>,
    classifier: Arc<dyn Classifier>,
    profiles: Arc<dyn ProfileSource>,
    responder: Arc<dyn HandlerResponder>,
    config: EngineConfig,
    escalation_signal: Regex,
}

impl Engine {
    /// Build an engine over its store, dispatcher, and collaborators.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid policy or an
    /// uncompilable escalation-signal pattern.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        dispatcher: Arc<Dispatcher>,
        classifier: Arc<dyn Classifier>,
        profiles: Arc<dyn ProfileSource>,
        responder: Arc<dyn HandlerResponder>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let escalation_signal = Regex::new(&config.routing.escalation_signal).map_err(|e| {
            EngineError::Configuration(format!("invalid escalation signal pattern: {e}"))
        })?;
        Ok(Self {
            store,
            dispatcher,
            classifier,
            profiles,
            responder,
            config,
            escalation_signal,
        })
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a conversation, snapshotting the customer profile when a
    /// customer id is known.
    ///
    /// # Errors
    ///
    /// Returns a transient conflict if the conversation already exists.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub async fn start_conversation(
        &self,
        conversation_id: &str,
        customer_id: Option<&str>,
    ) -> Result<ConversationState> {
        let mut state = ConversationState::new(conversation_id);
        if let Some(customer_id) = customer_id {
            state.customer = self.fetch_snapshot(customer_id).await;
        }

        match self.store.save(&state, 0).await {
            Ok(version) => {
                state.version = version;
                info!(conversation_id = %conversation_id, "conversation started");
                Ok(state)
            }
            Err(StateError::VersionConflict { .. }) => Err(EngineError::Conflict(format!(
                "conversation {conversation_id} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Process one inbound customer message.
    ///
    /// The turn is computed against the loaded version and persisted with
    /// the store's compare-and-swap. On a version conflict the engine
    /// reloads and recomputes exactly once; a second conflict surfaces as
    /// a transient error for the transport layer to retry.
    #[instrument(skip(self, message), fields(conversation_id = %conversation_id))]
    pub async fn process_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<TurnOutcome> {
        for attempt in 0..2 {
            let mut state = match self.store.load(conversation_id).await {
                Ok(state) => state,
                Err(StateError::NotFound(_)) => ConversationState::new(conversation_id),
                Err(e) => return Err(e.into()),
            };
            if state.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    from: state.status,
                    to: ConversationStatus::InProgress,
                });
            }

            let expected = state.version;
            let outcome = self.run_turn(&mut state, message).await?;

            match self.store.save(&state, expected).await {
                Ok(_) => return Ok(outcome),
                Err(StateError::VersionConflict { .. }) if attempt == 0 => {
                    debug!(
                        conversation_id = %conversation_id,
                        "version conflict, recomputing turn"
                    );
                }
                Err(StateError::VersionConflict {
                    expected, actual, ..
                }) => {
                    return Err(EngineError::Conflict(format!(
                        "save conflicted twice (expected {expected}, found {actual})"
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Conflict("turn retry exhausted".into()))
    }

    /// Summarize a conversation for status endpoints.
    pub async fn conversation_status(&self, conversation_id: &str) -> Result<ConversationSummary> {
        let state = self.store.load(conversation_id).await?;
        Ok(ConversationSummary {
            conversation_id: state.conversation_id.clone(),
            status: state.status,
            handler: state.current_handler,
            escalation_level: state.escalation_level,
            sentiment: state.sentiment,
            requires_human: state.requires_human,
            sla_breach_risk: state.sla_breach_risk,
            turns: state.history.len(),
            resolution_attempts: state.resolution_attempts.len(),
            last_activity: state.last_activity,
        })
    }

    /// Move a conversation out of the automated flow to a person.
    #[instrument(skip(self, reason), fields(conversation_id = %conversation_id))]
    pub async fn transfer_to_human(&self, conversation_id: &str, reason: &str) -> Result<()> {
        let mut state = self.store.load(conversation_id).await?;
        let expected = state.version;

        if state.status == ConversationStatus::New
            || state.status == ConversationStatus::PendingCustomer
        {
            machine::transition(&mut state, ConversationStatus::InProgress)?;
        }
        if state.status != ConversationStatus::Escalated {
            machine::transition(&mut state, ConversationStatus::Escalated)?;
        }
        if state.current_handler != HandlerKind::HumanHandoff {
            state.record_escalation(HandlerKind::HumanHandoff, reason);
        }
        state.requires_human = true;
        state.push_system_turn("Conversation transferred to a human agent");

        match self.store.save(&state, expected).await {
            Ok(_) => {
                info!(conversation_id = %conversation_id, reason = %reason, "transferred to human");
                Ok(())
            }
            Err(StateError::VersionConflict { .. }) => Err(EngineError::Conflict(
                "transfer raced an active turn; retry".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Close a resolved conversation.
    #[instrument(skip(self, reason), fields(conversation_id = %conversation_id))]
    pub async fn close(&self, conversation_id: &str, reason: &str) -> Result<()> {
        let mut state = self.store.load(conversation_id).await?;
        let expected = state.version;

        machine::transition(&mut state, ConversationStatus::Closed)?;
        state.push_system_turn(format!("Conversation closed: {reason}"));

        match self.store.save(&state, expected).await {
            Ok(_) => {
                info!(conversation_id = %conversation_id, reason = %reason, "conversation closed");
                Ok(())
            }
            Err(StateError::VersionConflict { .. }) => Err(EngineError::Conflict(
                "close raced an active turn; retry".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ── turn pipeline ───────────────────────────────────────────────

    async fn run_turn(&self, state: &mut ConversationState, message: &str) -> Result<TurnOutcome> {
        state.push_customer_turn(message);
        self.refresh_customer(state).await;
        state.sla_breach_risk = self.derive_sla_risk(state);

        let classification = self.classify_or_degrade(message, state).await;
        state.current_intent = classification.intent.clone();
        state.intent_confidence = classification.confidence;
        state.sentiment = classification.sentiment;
        state.sentiment_score = classification.sentiment_score;

        // Low confidence: ask the customer to clarify rather than guessing
        // a specialist. Status and escalation level stay untouched.
        if classification.confidence < self.config.routing.confidence_threshold {
            debug!(
                conversation_id = %state.conversation_id,
                confidence = classification.confidence,
                "confidence below threshold, requesting clarification"
            );
            let reply = self.reply_for(HandlerKind::Clarification, state).await;
            state.push_handler_turn(HandlerKind::Clarification, reply.text.clone());
            return Ok(TurnOutcome {
                response_text: reply.text,
                status: state.status,
                handler: HandlerKind::Clarification,
                escalated: false,
            });
        }

        // Processing begins: fresh, parked, and escalated conversations go
        // active. Resolved conversations cannot accept turns.
        if state.status != ConversationStatus::InProgress {
            machine::transition(state, ConversationStatus::InProgress)?;
        }

        let escalated = if state.requires_human {
            // Already out of the automated flow; hold the handoff.
            false
        } else {
            self.maybe_escalate(state, message)?
        };

        let active = state.current_handler;
        let reply = self.reply_for(active, state).await;

        let mut records = Vec::with_capacity(reply.tool_requests.len());
        let mut tool_trouble = false;
        for request in &reply.tool_requests {
            match self
                .dispatcher
                .dispatch(&request.tool, request.parameters.clone(), active, None)
                .await
            {
                Ok(dispatch) => {
                    if !dispatch.result.is_success() {
                        tool_trouble = true;
                    }
                    records.push(dispatch.record);
                }
                Err(e) => {
                    // A request for an unregistered tool is a responder
                    // bug; nothing external ran.
                    warn!(tool = %request.tool, error = %e, "tool request rejected");
                    tool_trouble = true;
                }
            }
        }

        // Resolution requires the handler's claim of success, clean tool
        // outcomes, and nothing still in flight.
        let pending_tools = records.iter().any(|r| r.completed_at.is_none());
        let success = reply.resolved && !tool_trouble && !pending_tools;

        state.resolution_attempts.push(ResolutionAttempt {
            handler: active,
            timestamp: Utc::now(),
            tools_invoked: records,
            outcome: if reply.outcome_note.is_empty() {
                "responded".to_string()
            } else {
                reply.outcome_note.clone()
            },
            confidence: reply.confidence,
            success,
        });
        state.push_handler_turn(active, reply.text.clone());

        if success {
            machine::transition(state, ConversationStatus::Resolved)?;
        } else if reply.needs_customer && state.status == ConversationStatus::InProgress {
            machine::transition(state, ConversationStatus::PendingCustomer)?;
        }

        Ok(TurnOutcome {
            response_text: reply.text,
            status: state.status,
            handler: active,
            escalated,
        })
    }

    /// Check the escalation triggers and apply the transition when one
    /// fires. Returns whether an escalation was recorded.
    fn maybe_escalate(&self, state: &mut ConversationState, message: &str) -> Result<bool> {
        let policy = &self.config.routing;
        let selected = routing::select_handler(policy, state, self.effective_tier(state));

        let explicit_request = self.escalation_signal.is_match(message);
        let attempts_exhausted = state.failed_attempts_for(state.current_handler)
            >= policy.max_attempts_per_handler as usize;
        let routed_to_escalation = selected.is_escalation_target();

        if !(explicit_request || attempts_exhausted || routed_to_escalation || state.sla_breach_risk)
        {
            state.assign_handler(selected);
            return Ok(false);
        }

        if state.current_handler == HandlerKind::HumanHandoff {
            // Nothing above to escalate to.
            return Ok(false);
        }

        let reason = routing::escalation_reasons(state, explicit_request, attempts_exhausted);
        let target = if routed_to_escalation && selected != state.current_handler {
            selected
        } else {
            routing::escalation_target(
                state.current_handler,
                state.escalation_level,
                state.requires_human,
                policy.max_escalation_level,
            )
        };
        let target = if target == state.current_handler {
            HandlerKind::HumanHandoff
        } else {
            target
        };

        let from = state.current_handler;
        machine::transition(state, ConversationStatus::Escalated)?;
        state.record_escalation(target, reason.clone());
        if target == HandlerKind::HumanHandoff
            || state.escalation_level >= policy.max_escalation_level
        {
            state.requires_human = true;
        }
        state.push_system_turn(format!("Escalated from {from} to {target}. Reason: {reason}"));
        info!(
            conversation_id = %state.conversation_id,
            from = %from,
            to = %target,
            level = state.escalation_level,
            reason = %reason,
            "conversation escalated"
        );
        Ok(true)
    }

    async fn classify_or_degrade(
        &self,
        message: &str,
        state: &ConversationState,
    ) -> Classification {
        match timeout(
            self.config.classifier_timeout(),
            self.classifier.classify(message, state),
        )
        .await
        {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    error = %e,
                    "classifier failed, degrading to clarification"
                );
                Classification::degraded()
            }
            Err(_) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    timeout_ms = self.config.classifier_timeout().as_millis() as u64,
                    "classifier timed out, degrading to clarification"
                );
                Classification::degraded()
            }
        }
    }

    async fn reply_for(&self, handler: HandlerKind, state: &ConversationState) -> HandlerReply {
        match self.responder.respond(handler, state).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    handler = %handler,
                    error = %e,
                    "responder failed, using fallback reply"
                );
                HandlerReply::text_only(fallback_text(handler))
            }
        }
    }

    async fn refresh_customer(&self, state: &mut ConversationState) {
        let Some(snapshot) = &state.customer else {
            return;
        };
        let age = Utc::now() - snapshot.fetched_at;
        if age < Duration::seconds(self.config.profile_max_age_secs as i64) {
            return;
        }

        let customer_id = snapshot.customer_id.clone();
        if let Some(fresh) = self.fetch_snapshot(&customer_id).await {
            state.customer = Some(fresh);
        }
        // A failed refresh keeps the stale snapshot; scoring degrades the
        // tier multiplier on its own.
    }

    async fn fetch_snapshot(
        &self,
        customer_id: &str,
    ) -> Option<frontdesk_state::CustomerSnapshot> {
        match timeout(
            self.config.profile_timeout(),
            self.profiles.fetch_profile(customer_id),
        )
        .await
        {
            Ok(Ok(Some(profile))) => Some(profile.snapshot()),
            Ok(Ok(None)) => {
                warn!(customer_id = %customer_id, "customer profile not found");
                None
            }
            Ok(Err(e)) => {
                warn!(customer_id = %customer_id, error = %e, "profile fetch failed");
                None
            }
            Err(_) => {
                warn!(customer_id = %customer_id, "profile fetch timed out");
                None
            }
        }
    }

    fn effective_tier(&self, state: &ConversationState) -> Option<CustomerTier> {
        state
            .customer
            .as_ref()
            .filter(|c| {
                Utc::now() - c.fetched_at
                    < Duration::seconds(self.config.profile_max_age_secs as i64)
            })
            .map(|c| c.tier)
    }

    fn derive_sla_risk(&self, state: &ConversationState) -> bool {
        let age = Utc::now() - state.started_at;
        age > Duration::seconds(self.config.sla_window_secs as i64)
            && !matches!(
                state.status,
                ConversationStatus::Resolved | ConversationStatus::Closed
            )
    }
}

fn fallback_text(handler: HandlerKind) -> &'static str {
    match handler {
        HandlerKind::Clarification => {
            "Could you tell me a bit more about what you need help with?"
        }
        HandlerKind::Supervisor | HandlerKind::HumanHandoff => {
            "I'm connecting you with someone who can help further."
        }
        _ => "I wasn't able to complete that just now. Let me look into it and follow up shortly.",
    }
}

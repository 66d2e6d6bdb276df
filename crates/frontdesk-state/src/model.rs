//! Conversation state model
//!
//! The `ConversationState` aggregate is the single source of truth for a
//! conversation. It is keyed by conversation id, mutated only through the
//! engine, and persisted with an optimistic version counter. The audit
//! sequences (`history`, `escalation_history`, `resolution_attempts`) are
//! append-only: entries are never edited or removed once pushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The customer
    Customer,
    /// An automated handler
    Handler,
    /// The orchestration system itself (routing notices, escalations)
    System,
}

/// Customer sentiment as reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// Positive sentiment
    Positive,
    /// Neutral sentiment
    Neutral,
    /// Negative sentiment
    Negative,
    /// Actively frustrated — escalation-relevant
    Frustrated,
}

impl Sentiment {
    /// True for sentiments that make escalation-prone handlers more
    /// attractive during routing.
    #[must_use]
    pub fn is_negative(self) -> bool {
        matches!(self, Self::Negative | Self::Frustrated)
    }
}

impl Default for Sentiment {
    fn default() -> Self {
        Self::Neutral
    }
}

/// Customer account tier, snapshotted from the profile system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    /// Entry tier
    Bronze,
    /// Mid tier
    Silver,
    /// Upper tier
    Gold,
    /// Highest-value accounts
    Platinum,
}

/// The specialist roles a conversation can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// General first-line support
    Tier1,
    /// Technical support
    Tier2,
    /// Expert-level support
    Tier3,
    /// Billing and payments
    Billing,
    /// Sales and upgrades
    Sales,
    /// Supervisor — escalation target
    Supervisor,
    /// Asks the customer to clarify when intent confidence is low
    Clarification,
    /// Transfer out of the automated flow to a person
    HumanHandoff,
}

impl HandlerKind {
    /// Stable string form used in logs and persisted records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
            Self::Billing => "billing",
            Self::Sales => "sales",
            Self::Supervisor => "supervisor",
            Self::Clarification => "clarification",
            Self::HumanHandoff => "human_handoff",
        }
    }

    /// Handlers that represent an escalated level of responsibility.
    /// Routing to one of these always records an escalation.
    #[must_use]
    pub fn is_escalation_target(&self) -> bool {
        matches!(self, Self::Supervisor | Self::HumanHandoff)
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a conversation.
///
/// Valid transitions are enforced by the engine's state machine; the store
/// persists whatever status the aggregate carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Just created, no routing has happened yet
    New,
    /// Actively being worked by a handler
    InProgress,
    /// Waiting on the customer to reply
    PendingCustomer,
    /// Escalated to a higher-capability handler
    Escalated,
    /// The active attempt resolved the issue
    Resolved,
    /// Terminal
    Closed,
}

impl ConversationStatus {
    /// Stable string form used in the durable store's status column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::PendingCustomer => "pending_customer",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// True once a conversation can no longer accept turns.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// When the turn happened
    pub timestamp: DateTime<Utc>,
    /// Who spoke
    pub speaker: Speaker,
    /// Message text
    pub text: String,
    /// Classified intent, when known
    pub intent: Option<String>,
    /// Classifier confidence for the intent
    pub confidence: Option<f64>,
    /// Handler that produced or processed this turn
    pub handler: Option<HandlerKind>,
}

/// Outcome of a single tool dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Tool executed and returned a payload
    Success,
    /// Tool executed and reported an error (after any retries)
    Failed,
    /// Tool did not complete within its timeout
    TimedOut,
    /// Caller role was not authorized; no call was attempted
    Denied,
}

impl ToolOutcome {
    /// Stable string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Denied => "denied",
        }
    }
}

/// Audit record of one tool invocation, embedded in the resolution attempt
/// that triggered it. Exactly one record exists per dispatch, whatever the
/// outcome — denials included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    /// Registered tool name
    pub tool: String,
    /// Role the dispatch was made on behalf of
    pub requested_by: HandlerKind,
    /// Parameters passed to the tool
    pub parameters: serde_json::Value,
    /// Dispatch start time
    pub started_at: DateTime<Utc>,
    /// Completion time; `None` only while the call is in flight
    pub completed_at: Option<DateTime<Utc>>,
    /// Final outcome
    pub outcome: ToolOutcome,
    /// Short human-readable summary of the result or error
    pub result_summary: String,
}

/// One handler's effort to address the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    /// Handler that made the attempt
    pub handler: HandlerKind,
    /// When the attempt was recorded
    pub timestamp: DateTime<Utc>,
    /// Tool invocations made during the attempt, in dispatch order
    pub tools_invoked: Vec<ToolInvocationRecord>,
    /// Free-form outcome note from the handler
    pub outcome: String,
    /// Handler's confidence in the attempt
    pub confidence: f64,
    /// Whether the handler considers the issue addressed
    pub success: bool,
}

/// Bounded context handed to the receiving handler on escalation.
///
/// Deliberately a closed struct rather than an open map: the fields below
/// are the full set a receiving handler gets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// One-line summary of the conversation so far
    pub summary: String,
    /// Intent at the time of escalation
    pub intent: String,
    /// Intent confidence at the time of escalation
    pub confidence: f64,
    /// Sentiment at the time of escalation
    pub sentiment: Sentiment,
    /// Number of resolution attempts so far
    pub attempt_count: usize,
    /// Escalation level before this transition
    pub escalation_level: u32,
    /// Customer tier, when a profile snapshot exists
    pub customer_tier: Option<CustomerTier>,
}

/// Audit record of one handoff to a higher-capability handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    /// Handler responsibility moved from
    pub from: HandlerKind,
    /// Handler responsibility moved to; never equal to `from`
    pub to: HandlerKind,
    /// When the transition was recorded
    pub timestamp: DateTime<Utc>,
    /// Why the escalation happened
    pub reason: String,
    /// Context handed to the receiving handler
    pub context: ContextSnapshot,
}

/// Cached reference to a customer profile owned by an external system.
///
/// Only the routing-relevant fields are snapshotted; `fetched_at` lets the
/// engine decide when the snapshot is too stale to trust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    /// External customer id
    pub customer_id: String,
    /// Account tier at fetch time
    pub tier: CustomerTier,
    /// Account status string at fetch time
    pub account_status: String,
    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

/// Root aggregate for one customer conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Store key
    pub conversation_id: String,
    /// Session identifier
    pub session_id: Uuid,
    /// Cached customer profile snapshot, if fetched
    pub customer: Option<CustomerSnapshot>,
    /// Append-only transcript
    pub history: Vec<ConversationTurn>,
    /// Most recent classified intent
    pub current_intent: String,
    /// Confidence of the current intent, in [0, 1]
    pub intent_confidence: f64,
    /// Most recent sentiment
    pub sentiment: Sentiment,
    /// Sentiment score, in [-1, 1]
    pub sentiment_score: f64,
    /// Handler currently responsible for the conversation
    pub current_handler: HandlerKind,
    /// Append-only sequence of handler assignments
    pub handler_history: Vec<HandlerKind>,
    /// Monotonically non-decreasing escalation level
    pub escalation_level: u32,
    /// Append-only escalation audit trail
    pub escalation_history: Vec<EscalationRecord>,
    /// Resolution attempts in chronological order
    pub resolution_attempts: Vec<ResolutionAttempt>,
    /// Lifecycle status
    pub status: ConversationStatus,
    /// Derived each turn: a person must take over
    pub requires_human: bool,
    /// Derived each turn: the SLA window is at risk
    pub sla_breach_risk: bool,
    /// Optimistic concurrency version; 0 until first persisted
    pub version: u64,
    /// When the conversation started
    pub started_at: DateTime<Utc>,
    /// Last turn or lifecycle activity; drives idle reclamation
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    /// Create a fresh, unpersisted conversation.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            session_id: Uuid::new_v4(),
            customer: None,
            history: Vec::new(),
            current_intent: String::new(),
            intent_confidence: 0.0,
            sentiment: Sentiment::Neutral,
            sentiment_score: 0.0,
            current_handler: HandlerKind::Tier1,
            handler_history: Vec::new(),
            escalation_level: 0,
            escalation_history: Vec::new(),
            resolution_attempts: Vec::new(),
            status: ConversationStatus::New,
            requires_human: false,
            sla_breach_risk: false,
            version: 0,
            started_at: now,
            last_activity: now,
        }
    }

    /// Append a turn to the transcript and refresh `last_activity`.
    pub fn push_turn(&mut self, turn: ConversationTurn) {
        self.last_activity = turn.timestamp;
        self.history.push(turn);
    }

    /// Append a customer message turn.
    pub fn push_customer_turn(&mut self, text: impl Into<String>) {
        self.push_turn(ConversationTurn {
            timestamp: Utc::now(),
            speaker: Speaker::Customer,
            text: text.into(),
            intent: None,
            confidence: None,
            handler: None,
        });
    }

    /// Append a handler reply turn.
    pub fn push_handler_turn(&mut self, handler: HandlerKind, text: impl Into<String>) {
        self.push_turn(ConversationTurn {
            timestamp: Utc::now(),
            speaker: Speaker::Handler,
            text: text.into(),
            intent: Some(self.current_intent.clone()),
            confidence: Some(self.intent_confidence),
            handler: Some(handler),
        });
    }

    /// Append a system notice turn (routing decisions, escalations).
    pub fn push_system_turn(&mut self, text: impl Into<String>) {
        let intent = if self.current_intent.is_empty() {
            None
        } else {
            Some(self.current_intent.clone())
        };
        self.push_turn(ConversationTurn {
            timestamp: Utc::now(),
            speaker: Speaker::System,
            text: text.into(),
            intent,
            confidence: None,
            handler: None,
        });
    }

    /// Record an escalation transition. The caller supplies the target and
    /// reason; the level bump and audit entry happen here so they can never
    /// be applied separately.
    ///
    /// # Panics
    ///
    /// Debug-asserts that `to` differs from the current handler; the engine
    /// resolves same-handler escalations through the ladder before calling.
    pub fn record_escalation(&mut self, to: HandlerKind, reason: impl Into<String>) {
        let from = self.current_handler;
        debug_assert_ne!(from, to, "escalation must change handlers");
        self.escalation_history.push(EscalationRecord {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.into(),
            context: self.context_snapshot(),
        });
        self.escalation_level += 1;
        self.handler_history.push(to);
        self.current_handler = to;
    }

    /// Assign a handler without escalating.
    pub fn assign_handler(&mut self, handler: HandlerKind) {
        if self.current_handler != handler || self.handler_history.is_empty() {
            self.handler_history.push(handler);
        }
        self.current_handler = handler;
    }

    /// Number of unsuccessful resolution attempts made by `handler`.
    #[must_use]
    pub fn failed_attempts_for(&self, handler: HandlerKind) -> usize {
        self.resolution_attempts
            .iter()
            .filter(|a| a.handler == handler && !a.success)
            .count()
    }

    /// Number of unsuccessful resolution attempts across all handlers.
    #[must_use]
    pub fn failed_attempts(&self) -> usize {
        self.resolution_attempts.iter().filter(|a| !a.success).count()
    }

    /// Bounded context snapshot for escalation records.
    #[must_use]
    pub fn context_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            summary: self.summary_line(),
            intent: self.current_intent.clone(),
            confidence: self.intent_confidence,
            sentiment: self.sentiment,
            attempt_count: self.resolution_attempts.len(),
            escalation_level: self.escalation_level,
            customer_tier: self.customer.as_ref().map(|c| c.tier),
        }
    }

    /// One-line summary used in handoff context and logs.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "intent={} status={} handler={} level={} attempts={} sentiment={:?}",
            self.current_intent,
            self.status,
            self.current_handler,
            self.escalation_level,
            self.resolution_attempts.len(),
            self.sentiment,
        )
    }

    /// Refresh `last_activity` to now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

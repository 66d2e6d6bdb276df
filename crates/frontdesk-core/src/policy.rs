//! Routing and escalation policy
//!
//! Every business-critical number lives here as reviewable configuration:
//! weight tables, penalty factors, the confidence gate, the escalation
//! caps, and the deterministic tie-break ordering. The defaults carry the
//! production values; deployments override them from TOML.

use crate::error::{EngineError, Result};
use frontdesk_state::{CustomerTier, HandlerKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use HandlerKind::{Billing, Sales, Supervisor, Tier1, Tier2, Tier3};

/// Scoring and escalation policy for the routing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    /// Weight per (intent category, handler)
    pub intent_weights: HashMap<String, HashMap<HandlerKind, f64>>,
    /// Raw intent → routing category folding
    pub intent_categories: HashMap<String, String>,
    /// Multiplier per (customer tier, handler); absent pairs default to 1.0
    pub tier_multipliers: HashMap<CustomerTier, HashMap<HandlerKind, f64>>,
    /// Penalty contribution per escalation level
    pub level_factor: f64,
    /// Penalty contribution per failed resolution attempt
    pub attempt_factor: f64,
    /// Fixed penalty driver added when sentiment is negative or frustrated
    pub frustration_penalty: f64,
    /// Fixed penalty driver added when the SLA window is at risk
    pub sla_penalty: f64,
    /// How strongly each handler feels the penalty drivers; escalation
    /// targets carry 0 so frustration makes them relatively more attractive
    pub de_escalation_weight: HashMap<HandlerKind, f64>,
    /// Below this intent confidence the engine asks for clarification
    /// instead of routing to a specialist
    pub confidence_threshold: f64,
    /// Failed attempts by the current handler before escalation triggers
    pub max_attempts_per_handler: u32,
    /// Escalation level at which the conversation goes to a person
    pub max_escalation_level: u32,
    /// Pattern matched against customer messages to detect an explicit
    /// escalation request
    pub escalation_signal: String,
    /// Candidate handlers in tie-break order, most specialized last;
    /// on equal scores the later entry wins
    pub tie_break: Vec<HandlerKind>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            intent_weights: default_intent_weights(),
            intent_categories: default_intent_categories(),
            tier_multipliers: default_tier_multipliers(),
            level_factor: 0.3,
            attempt_factor: 0.15,
            frustration_penalty: 0.4,
            sla_penalty: 0.4,
            de_escalation_weight: HashMap::from([
                (Tier1, 1.0),
                (Sales, 0.9),
                (Billing, 0.9),
                (Tier2, 0.6),
                (Tier3, 0.3),
                (Supervisor, 0.0),
            ]),
            confidence_threshold: 0.85,
            max_attempts_per_handler: 3,
            max_escalation_level: 3,
            escalation_signal:
                r"(?i)\b(speak|talk)\s+(to|with)\s+(a\s+|the\s+)?(manager|supervisor|human|agent|person)\b|(?i)\bescalate\b"
                    .to_string(),
            tie_break: vec![Tier1, Sales, Billing, Tier2, Tier3, Supervisor],
        }
    }
}

impl RoutingPolicy {
    /// Fold a raw classifier intent into a routing category.
    #[must_use]
    pub fn categorize<'a>(&'a self, intent: &str) -> &'a str {
        self.intent_categories
            .get(intent)
            .map(String::as_str)
            .unwrap_or("faq")
    }
}

fn weights(entries: &[(HandlerKind, f64)]) -> HashMap<HandlerKind, f64> {
    entries.iter().copied().collect()
}

fn default_intent_weights() -> HashMap<String, HashMap<HandlerKind, f64>> {
    HashMap::from([
        ("faq".to_string(), weights(&[(Tier1, 0.9)])),
        ("account_access".to_string(), weights(&[(Tier1, 0.8)])),
        ("password_reset".to_string(), weights(&[(Tier1, 0.9)])),
        (
            "technical".to_string(),
            weights(&[(Tier2, 0.8), (Tier1, 0.3)]),
        ),
        ("connection_issue".to_string(), weights(&[(Tier2, 0.9)])),
        (
            "system_error".to_string(),
            weights(&[(Tier2, 0.8), (Tier3, 0.6)]),
        ),
        (
            "billing".to_string(),
            weights(&[(Billing, 0.9), (Tier1, 0.2)]),
        ),
        ("payment_issue".to_string(), weights(&[(Billing, 0.9)])),
        ("refund_request".to_string(), weights(&[(Billing, 0.8)])),
        ("sales".to_string(), weights(&[(Sales, 0.9), (Tier1, 0.1)])),
        ("product_inquiry".to_string(), weights(&[(Sales, 0.8)])),
        ("upgrade_request".to_string(), weights(&[(Sales, 0.9)])),
        (
            "complaint".to_string(),
            weights(&[(Supervisor, 0.7), (Tier3, 0.5)]),
        ),
        ("escalation".to_string(), weights(&[(Supervisor, 1.0)])),
        (
            "cancellation".to_string(),
            weights(&[(Supervisor, 0.6), (Tier3, 0.4)]),
        ),
    ])
}

fn default_intent_categories() -> HashMap<String, String> {
    [
        ("account_access", "account_access"),
        ("login_issue", "account_access"),
        ("password_reset", "password_reset"),
        ("forgot_password", "password_reset"),
        ("service_status", "technical"),
        ("connection_issue", "connection_issue"),
        ("slow_performance", "technical"),
        ("system_error", "system_error"),
        ("billing_inquiry", "billing"),
        ("payment_issue", "payment_issue"),
        ("refund_request", "refund_request"),
        ("invoice_question", "billing"),
        ("product_inquiry", "product_inquiry"),
        ("pricing_question", "sales"),
        ("upgrade_request", "upgrade_request"),
        ("downgrade_request", "sales"),
        ("complaint", "complaint"),
        ("dissatisfaction", "complaint"),
        ("escalation", "escalation"),
        ("speak_to_manager", "escalation"),
        ("cancellation", "cancellation"),
        ("terminate_service", "cancellation"),
        ("general_inquiry", "faq"),
        ("how_to", "faq"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_tier_multipliers() -> HashMap<CustomerTier, HashMap<HandlerKind, f64>> {
    HashMap::from([
        (
            CustomerTier::Platinum,
            weights(&[(Tier3, 1.3), (Supervisor, 1.2)]),
        ),
        (
            CustomerTier::Gold,
            weights(&[(Tier2, 1.2), (Tier3, 1.1)]),
        ),
        (
            CustomerTier::Silver,
            weights(&[(Tier1, 1.1), (Tier2, 1.0)]),
        ),
        (CustomerTier::Bronze, weights(&[(Tier1, 1.2)])),
    ])
}

/// Engine configuration: the routing policy plus collaborator timeouts and
/// lifecycle windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scoring and escalation policy
    pub routing: RoutingPolicy,
    /// Classification collaborator timeout, in seconds
    pub classifier_timeout_secs: u64,
    /// Profile collaborator timeout, in seconds
    pub profile_timeout_secs: u64,
    /// Customer snapshot age beyond which the tier multiplier degrades to
    /// neutral, in seconds
    pub profile_max_age_secs: u64,
    /// Conversation age after which `sla_breach_risk` derives true, in
    /// seconds
    pub sla_window_secs: u64,
    /// Idle window used by the reclamation sweep, in seconds
    pub idle_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::default(),
            classifier_timeout_secs: 2,
            profile_timeout_secs: 2,
            profile_max_age_secs: 300,
            sla_window_secs: 3600,
            idle_timeout_secs: 1800,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML, falling back to defaults for any
    /// omitted field.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparsable TOML or an invalid
    /// policy (empty tie-break, threshold outside [0, 1]).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| EngineError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check policy invariants that TOML parsing cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.routing.tie_break.is_empty() {
            return Err(EngineError::Configuration(
                "tie_break ordering must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.routing.confidence_threshold) {
            return Err(EngineError::Configuration(
                "confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if self.routing.max_attempts_per_handler == 0 {
            return Err(EngineError::Configuration(
                "max_attempts_per_handler must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Classifier timeout as a [`Duration`].
    #[must_use]
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    /// Profile timeout as a [`Duration`].
    #[must_use]
    pub fn profile_timeout(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_secs)
    }
}

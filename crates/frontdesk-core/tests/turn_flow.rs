//! End-to-end turn flow over the in-memory store: a conversation that is
//! clarified, routed, escalated after repeated failures, resolved, and
//! closed — plus the optimistic-concurrency retry contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_core::classify::{Classification, Classifier};
use frontdesk_core::profile::{CustomerProfile, ProfileSource};
use frontdesk_core::responder::{HandlerReply, HandlerResponder, ToolRequest};
use frontdesk_core::{Engine, EngineConfig, EngineError};
use frontdesk_state::{
    ConversationState, ConversationStatus, ConversationStore, CustomerTier, HandlerKind,
    MemoryBackend, Result as StateResult, Sentiment, StateError, TieredStore,
};
use frontdesk_tools::{Dispatcher, Tool, ToolRegistry, ToolSpec};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Classifier scripted with one result per turn.
struct ScriptedClassifier {
    script: Mutex<Vec<Classification>>,
}

impl ScriptedClassifier {
    fn new(script: Vec<Classification>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        _text: &str,
        _context: &ConversationState,
    ) -> anyhow::Result<Classification> {
        let mut script = self.script.lock().await;
        if script.is_empty() {
            anyhow::bail!("script exhausted")
        }
        Ok(script.remove(0))
    }
}

fn classified(intent: &str, confidence: f64, sentiment: Sentiment) -> Classification {
    Classification {
        intent: intent.to_string(),
        confidence,
        sentiment,
        sentiment_score: match sentiment {
            Sentiment::Positive => 0.6,
            Sentiment::Neutral => 0.0,
            Sentiment::Negative => -0.5,
            Sentiment::Frustrated => -0.9,
        },
    }
}

struct GoldProfiles;

#[async_trait]
impl ProfileSource for GoldProfiles {
    async fn fetch_profile(&self, customer_id: &str) -> anyhow::Result<Option<CustomerProfile>> {
        Ok(Some(CustomerProfile {
            customer_id: customer_id.to_string(),
            name: "Dana Customer".into(),
            email: "dana@example.com".into(),
            tier: CustomerTier::Gold,
            account_status: "active".into(),
            lifetime_value: 4200.0,
        }))
    }
}

/// Responder that fails until the conversation has been escalated, then
/// resolves with a knowledge-base lookup.
struct EscalationAwareResponder;

#[async_trait]
impl HandlerResponder for EscalationAwareResponder {
    async fn respond(
        &self,
        handler: HandlerKind,
        state: &ConversationState,
    ) -> anyhow::Result<HandlerReply> {
        if handler == HandlerKind::Clarification {
            return Ok(HandlerReply::text_only(
                "Could you give me a few more details?",
            ));
        }
        if state.escalation_level == 0 {
            return Ok(HandlerReply {
                text: "I tried a fix, but it didn't take.".into(),
                tool_requests: vec![],
                confidence: 0.4,
                resolved: false,
                needs_customer: false,
                outcome_note: "fix attempt failed".into(),
            });
        }
        Ok(HandlerReply {
            text: "Found it — your line had a stale provisioning entry. Fixed.".into(),
            tool_requests: vec![ToolRequest {
                tool: "search_knowledge_base".into(),
                parameters: serde_json::json!({ "q": "stale provisioning" }),
            }],
            confidence: 0.93,
            resolved: true,
            needs_customer: false,
            outcome_note: "provisioning corrected".into(),
        })
    }
}

struct KbTool;

#[async_trait]
impl Tool for KbTool {
    async fn call(&self, _parameters: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "articles": ["KB-204"] }))
    }
}

fn dispatcher() -> Arc<Dispatcher> {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            ToolSpec::new("search_knowledge_base", "kb search").with_roles([
                HandlerKind::Tier1,
                HandlerKind::Tier2,
                HandlerKind::Tier3,
                HandlerKind::Supervisor,
            ]),
            Arc::new(KbTool),
        )
        .unwrap();
    Arc::new(Dispatcher::new(Arc::new(registry)))
}

fn engine_over(
    store: Arc<dyn ConversationStore>,
    classifier: Arc<dyn Classifier>,
) -> Engine {
    Engine::new(
        store,
        dispatcher(),
        classifier,
        Arc::new(GoldProfiles),
        Arc::new(EscalationAwareResponder),
        EngineConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn full_conversation_journey() {
    let durable = Arc::new(MemoryBackend::new());
    let store = Arc::new(TieredStore::new(durable.clone() as Arc<dyn ConversationStore>));

    let classifier = Arc::new(ScriptedClassifier::new(vec![
        // Turn 1: mumbled — below the confidence gate.
        classified("unknown", 0.3, Sentiment::Neutral),
        // Turns 2-4: clear technical intent, growing frustration.
        classified("connection_issue", 0.91, Sentiment::Neutral),
        classified("connection_issue", 0.9, Sentiment::Negative),
        classified("connection_issue", 0.92, Sentiment::Frustrated),
        // Turn 5: post-escalation follow-up.
        classified("connection_issue", 0.95, Sentiment::Neutral),
    ]));

    let engine = engine_over(store.clone() as Arc<dyn ConversationStore>, classifier);
    engine
        .start_conversation("journey", Some("cust-77"))
        .await
        .unwrap();

    // Turn 1: clarification, no routing advance.
    let t1 = engine.process_message("journey", "hi uh it's broken").await.unwrap();
    assert_eq!(t1.handler, HandlerKind::Clarification);
    assert_eq!(t1.status, ConversationStatus::New);

    // Turns 2-4: tier2 works the issue and keeps failing.
    for text in ["my internet keeps dropping", "still dropping", "this is ridiculous"] {
        let outcome = engine.process_message("journey", text).await.unwrap();
        assert!(!outcome.escalated);
        assert_eq!(outcome.handler, HandlerKind::Tier2);
    }

    let mid = engine.conversation_status("journey").await.unwrap();
    assert_eq!(mid.status, ConversationStatus::InProgress);
    assert_eq!(mid.resolution_attempts, 3);
    assert!(!mid.requires_human);

    // Turn 5: three failed tier2 attempts push the conversation up the
    // ladder, and the receiving handler resolves it.
    let t5 = engine.process_message("journey", "any update?").await.unwrap();
    assert!(t5.escalated);
    assert_eq!(t5.status, ConversationStatus::Resolved);

    let state = durable.load("journey").await.unwrap();
    assert_eq!(state.escalation_level, 1);
    assert_eq!(state.escalation_history.len(), 1);
    assert_eq!(state.escalation_history[0].from, HandlerKind::Tier2);
    assert_eq!(state.escalation_history[0].to, HandlerKind::Tier3);
    assert!(state.escalation_history[0]
        .reason
        .contains("multiple_failed_attempts"));
    // The escalation context is a bounded snapshot, not an open bag.
    assert_eq!(state.escalation_history[0].context.attempt_count, 3);
    assert_eq!(
        state.escalation_history[0].context.customer_tier,
        Some(CustomerTier::Gold)
    );

    // Audit trail: the resolving attempt embeds its tool record.
    let last = state.resolution_attempts.last().unwrap();
    assert!(last.success);
    assert_eq!(last.tools_invoked.len(), 1);
    assert_eq!(last.tools_invoked[0].tool, "search_knowledge_base");

    // Version advanced once per persisted turn plus the start.
    assert_eq!(state.version, 6);

    // Close out and verify terminality.
    engine.close("journey", "resolved").await.unwrap();
    let err = engine.process_message("journey", "one more thing").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

/// Store wrapper that injects version conflicts on the first N saves.
struct ConflictingStore {
    inner: Arc<MemoryBackend>,
    conflicts_left: AtomicU32,
}

#[async_trait]
impl ConversationStore for ConflictingStore {
    async fn load(&self, conversation_id: &str) -> StateResult<ConversationState> {
        self.inner.load(conversation_id).await
    }

    async fn save(&self, state: &ConversationState, expected_version: u64) -> StateResult<u64> {
        if self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StateError::VersionConflict {
                conversation_id: state.conversation_id.clone(),
                expected: expected_version,
                actual: expected_version + 1,
            });
        }
        self.inner.save(state, expected_version).await
    }

    async fn archive(&self, conversation_id: &str) -> StateResult<()> {
        self.inner.archive(conversation_id).await
    }

    async fn list_idle_before(&self, cutoff: DateTime<Utc>) -> StateResult<Vec<String>> {
        self.inner.list_idle_before(cutoff).await
    }
}

fn steady_classifier() -> Arc<dyn Classifier> {
    Arc::new(ScriptedClassifier::new(vec![
        classified("general_inquiry", 0.9, Sentiment::Neutral),
        classified("general_inquiry", 0.9, Sentiment::Neutral),
        classified("general_inquiry", 0.9, Sentiment::Neutral),
    ]))
}

#[tokio::test]
async fn one_conflict_is_absorbed_by_recomputation() {
    let store = Arc::new(ConflictingStore {
        inner: Arc::new(MemoryBackend::new()),
        conflicts_left: AtomicU32::new(1),
    });
    let engine = engine_over(store.clone() as Arc<dyn ConversationStore>, steady_classifier());

    let outcome = engine.process_message("retry", "hello").await.unwrap();
    assert_eq!(outcome.status, ConversationStatus::InProgress);

    // The recomputed turn persisted exactly once.
    let state = store.inner.load("retry").await.unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.resolution_attempts.len(), 1);
}

#[tokio::test]
async fn repeated_conflicts_surface_as_transient() {
    let store = Arc::new(ConflictingStore {
        inner: Arc::new(MemoryBackend::new()),
        conflicts_left: AtomicU32::new(2),
    });
    let engine = engine_over(store as Arc<dyn ConversationStore>, steady_classifier());

    let err = engine.process_message("retry2", "hello").await.unwrap_err();
    assert!(err.is_transient());
}

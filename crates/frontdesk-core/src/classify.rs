//! Classification collaborator boundary
//!
//! Intent and sentiment inference is an external capability. The engine
//! only sees this trait, calls it under a bounded timeout, and treats any
//! failure or breach as `confidence = 0` — the turn then degrades to the
//! clarification handler instead of failing.

use frontdesk_state::{ConversationState, Sentiment};
use serde::{Deserialize, Serialize};

/// Result of classifying one customer message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Classified intent label
    pub intent: String,
    /// Confidence in the intent, in [0, 1]
    pub confidence: f64,
    /// Detected sentiment
    pub sentiment: Sentiment,
    /// Sentiment score, in [-1, 1]
    pub sentiment_score: f64,
}

impl Classification {
    /// The zero-confidence classification used when the collaborator
    /// fails or times out.
    #[must_use]
    pub fn degraded() -> Self {
        Self {
            intent: "unknown".to_string(),
            confidence: 0.0,
            sentiment: Sentiment::Neutral,
            sentiment_score: 0.0,
        }
    }
}

/// External classification collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a customer message given the conversation so far.
    async fn classify(
        &self,
        text: &str,
        context: &ConversationState,
    ) -> anyhow::Result<Classification>;
}

//! Frontdesk Core - Routing & Escalation Engine
//!
//! This crate drives the conversation state machine:
//! - Routing: a pure scoring function over declared weight tables, with a
//!   deterministic tie-break
//! - Escalation: trigger detection, the escalation ladder, and the
//!   append-only audit lineage
//! - Engine: the per-turn pipeline over the state store's optimistic
//!   concurrency contract and the tool dispatcher
//! - Collaborator boundaries: classification, customer profiles, and
//!   handler response generation as traits
//!
//! Transport, authentication, and the concrete external systems live
//! outside this crate and call in through [`Engine`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod engine;
pub mod error;
pub mod machine;
pub mod policy;
pub mod profile;
pub mod responder;
pub mod routing;

pub use classify::{Classification, Classifier};
pub use engine::{ConversationSummary, Engine, TurnOutcome};
pub use error::{EngineError, Result};
pub use machine::{can_transition, transition};
pub use policy::{EngineConfig, RoutingPolicy};
pub use profile::{CustomerProfile, ProfileSource};
pub use responder::{HandlerReply, HandlerResponder, ToolRequest};
pub use routing::{escalation_target, score_handler, select_handler};

// The domain model and tool layer are re-exported so transport-layer
// callers only need this crate.
pub use frontdesk_state::{
    ConversationState, ConversationStatus, ConversationStore, CustomerTier, HandlerKind, Sentiment,
};
pub use frontdesk_tools::{Dispatcher, ToolRegistry, ToolSpec};

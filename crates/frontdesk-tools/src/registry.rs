//! Tool registry
//!
//! Tools are registered once at startup with their authorization set,
//! timeout, retry policy, and idempotency class, and the registry is
//! read-only afterwards. Validation happens at registration so a bad
//! role/tool combination is rejected before any conversation can hit it.

use crate::error::{Result, ToolError};
use frontdesk_state::HandlerKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Whether a tool may be transparently re-attempted after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    /// Re-running the tool is harmless (reads, idempotent writes)
    SafeToRetry,
    /// Re-running could duplicate an external effect (payments, refunds)
    MustNotRetry,
}

/// Retry schedule for `safe_to_retry` tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts beyond the first
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Ceiling on any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): base × 2^retry, capped.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Registered metadata for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema for parameters
    pub parameters: serde_json::Value,
    /// Roles allowed to invoke the tool
    pub authorized_roles: HashSet<HandlerKind>,
    /// Execution timeout, in seconds
    pub timeout_secs: u64,
    /// Retry schedule (applies only when `idempotency` permits)
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Idempotency class
    pub idempotency: Idempotency,
}

impl ToolSpec {
    /// Create a spec with an empty schema, a 10 s timeout, default retries,
    /// and the safe-to-retry class. Roles must be added before registration.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            authorized_roles: HashSet::new(),
            timeout_secs: 10,
            retry: RetryPolicy::default(),
            idempotency: Idempotency::SafeToRetry,
        }
    }

    /// Set the parameters schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the authorized role set.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = HandlerKind>) -> Self {
        self.authorized_roles = roles.into_iter().collect();
        self
    }

    /// Set the execution timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the retry count, keeping the default backoff shape.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Mark the tool as never auto-retried and zero its retry budget.
    #[must_use]
    pub fn must_not_retry(mut self) -> Self {
        self.idempotency = Idempotency::MustNotRetry;
        self.retry.max_retries = 0;
        self
    }

    /// Execution timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Trait for tool implementations — adapters over external systems
/// (ticketing, billing, knowledge base, diagnostics).
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with the given parameters.
    async fn call(&self, parameters: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn Tool>,
}

/// Registry of tools, read-only after startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool spec with its implementation.
    ///
    /// # Errors
    ///
    /// Rejects empty names, duplicate names, empty role sets, zero
    /// timeouts, and `must_not_retry` specs that carry a retry budget.
    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn Tool>) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(ToolError::InvalidSpec {
                name: spec.name,
                message: "tool name must not be empty".into(),
            });
        }
        if self.tools.contains_key(&spec.name) {
            return Err(ToolError::DuplicateTool(spec.name));
        }
        if spec.authorized_roles.is_empty() {
            return Err(ToolError::InvalidSpec {
                name: spec.name,
                message: "authorized role set must not be empty".into(),
            });
        }
        if spec.timeout_secs == 0 {
            return Err(ToolError::InvalidSpec {
                name: spec.name,
                message: "timeout must be positive".into(),
            });
        }
        if spec.idempotency == Idempotency::MustNotRetry && spec.retry.max_retries > 0 {
            return Err(ToolError::InvalidSpec {
                name: spec.name,
                message: "must_not_retry tools cannot carry a retry budget".into(),
            });
        }

        debug!(tool = %spec.name, roles = spec.authorized_roles.len(), "registering tool");
        self.tools
            .insert(spec.name.clone(), RegisteredTool { spec, handler });
        Ok(())
    }

    /// Get a tool's spec by name.
    #[must_use]
    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// Get a tool's implementation by name.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| Arc::clone(&t.handler))
    }

    /// Check whether a tool exists.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Whether `role` may invoke `name`. `None` when the tool is unknown.
    #[must_use]
    pub fn is_authorized(&self, name: &str, role: HandlerKind) -> Option<bool> {
        self.spec(name).map(|s| s.authorized_roles.contains(&role))
    }

    /// All registered tool names.
    #[must_use]
    pub fn list_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

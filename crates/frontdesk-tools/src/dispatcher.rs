//! Tool dispatcher
//!
//! Runs registered tools under their timeout and retry discipline, with the
//! authorization check first so a denied call never reaches the external
//! system. Every dispatch — denied, failed, timed out, or successful —
//! produces exactly one [`ToolInvocationRecord`] for the calling resolution
//! attempt; the audit trail is never lossy.

use crate::error::{Result, ToolError};
use crate::registry::{Idempotency, ToolRegistry, ToolSpec};
use chrono::Utc;
use frontdesk_state::{HandlerKind, ToolInvocationRecord, ToolOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Maximum length of a persisted result summary.
const SUMMARY_MAX_LEN: usize = 160;

/// Outcome of a dispatch: the tool's payload on success, or the error
/// detail otherwise.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Final outcome after any retries
    pub outcome: ToolOutcome,
    /// Tool payload; `Null` unless the outcome is `Success`
    pub payload: serde_json::Value,
    /// Error description for non-success outcomes
    pub error_detail: Option<String>,
}

impl ToolResult {
    /// Whether the dispatch ultimately succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ToolOutcome::Success
    }
}

/// A completed dispatch: result plus its audit record.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// The outcome handed back to the handler
    pub result: ToolResult,
    /// The audit record to embed in the resolution attempt
    pub record: ToolInvocationRecord,
}

/// Per-tool dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// All dispatches, whatever the outcome
    pub total: u64,
    /// Dispatches that ended in `Success`
    pub succeeded: u64,
    /// Dispatches that ended in `Failed`
    pub failed: u64,
    /// Dispatches that ended in `TimedOut`
    pub timed_out: u64,
    /// Dispatches rejected by the authorization gate
    pub denied: u64,
}

/// Authorized, retried, timed tool execution.
///
/// Holds no domain state beyond the read-only registry and the per-tool
/// counters.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    stats: RwLock<HashMap<String, DispatchStats>>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// The registry this dispatcher serves.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Counters for one tool. Zeroes if the tool was never dispatched.
    pub async fn stats_for(&self, tool: &str) -> DispatchStats {
        self.stats
            .read()
            .await
            .get(tool)
            .copied()
            .unwrap_or_default()
    }

    /// Dispatch a tool on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Only an unknown tool name is an error — that is a caller bug.
    /// Denial, failure, and timeout come back as outcomes inside the
    /// [`Dispatch`].
    #[instrument(skip(self, parameters), fields(tool = %tool_name, caller = %caller))]
    pub async fn dispatch(
        &self,
        tool_name: &str,
        parameters: serde_json::Value,
        caller: HandlerKind,
        timeout_override: Option<Duration>,
    ) -> Result<Dispatch> {
        let spec = self
            .registry
            .spec(tool_name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        let started_at = Utc::now();

        // Authorization precedes everything: a denied call never reaches
        // the external system, but it still produces an audit record.
        if !spec.authorized_roles.contains(&caller) {
            warn!(tool = %tool_name, caller = %caller, "tool dispatch denied");
            let detail = format!("role {caller} is not authorized for {tool_name}");
            self.bump_stats(tool_name, ToolOutcome::Denied).await;
            return Ok(Dispatch {
                result: ToolResult {
                    outcome: ToolOutcome::Denied,
                    payload: serde_json::Value::Null,
                    error_detail: Some(detail.clone()),
                },
                record: ToolInvocationRecord {
                    tool: tool_name.to_string(),
                    requested_by: caller,
                    parameters,
                    started_at,
                    completed_at: Some(Utc::now()),
                    outcome: ToolOutcome::Denied,
                    result_summary: detail,
                },
            });
        }

        if !parameters.is_object() {
            return Err(ToolError::InvalidParams {
                tool: tool_name.to_string(),
                message: "parameters must be an object".into(),
            });
        }

        let execution_timeout = timeout_override.unwrap_or_else(|| spec.timeout());
        let result = self
            .run_with_retries(&spec, &parameters, execution_timeout)
            .await;

        let summary = match result.outcome {
            ToolOutcome::Success => summarize(&result.payload),
            _ => result
                .error_detail
                .clone()
                .unwrap_or_else(|| result.outcome.as_str().to_string()),
        };

        self.bump_stats(tool_name, result.outcome).await;
        debug!(
            tool = %tool_name,
            outcome = %result.outcome.as_str(),
            "tool dispatch completed"
        );

        Ok(Dispatch {
            record: ToolInvocationRecord {
                tool: tool_name.to_string(),
                requested_by: caller,
                parameters,
                started_at,
                completed_at: Some(Utc::now()),
                outcome: result.outcome,
                result_summary: summary,
            },
            result,
        })
    }

    async fn run_with_retries(
        &self,
        spec: &ToolSpec,
        parameters: &serde_json::Value,
        execution_timeout: Duration,
    ) -> ToolResult {
        let handler = match self.registry.handler(&spec.name) {
            Some(handler) => handler,
            None => {
                // Registry entries always pair spec and handler; reaching
                // this means the registry was mutated after startup.
                return ToolResult {
                    outcome: ToolOutcome::Failed,
                    payload: serde_json::Value::Null,
                    error_detail: Some(format!("no implementation registered for {}", spec.name)),
                };
            }
        };

        let retries_allowed = match spec.idempotency {
            Idempotency::SafeToRetry => spec.retry.max_retries,
            Idempotency::MustNotRetry => 0,
        };

        let mut last = ToolResult {
            outcome: ToolOutcome::Failed,
            payload: serde_json::Value::Null,
            error_detail: None,
        };

        for attempt in 0..=retries_allowed {
            last = match timeout(execution_timeout, handler.call(parameters.clone())).await {
                Ok(Ok(payload)) => ToolResult {
                    outcome: ToolOutcome::Success,
                    payload,
                    error_detail: None,
                },
                Ok(Err(e)) => ToolResult {
                    outcome: ToolOutcome::Failed,
                    payload: serde_json::Value::Null,
                    error_detail: Some(e.to_string()),
                },
                Err(_) => ToolResult {
                    outcome: ToolOutcome::TimedOut,
                    payload: serde_json::Value::Null,
                    error_detail: Some(format!(
                        "timed out after {} ms",
                        execution_timeout.as_millis()
                    )),
                },
            };

            if last.is_success() {
                break;
            }
            if attempt < retries_allowed {
                let delay = spec.retry.delay_for(attempt);
                warn!(
                    tool = %spec.name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    outcome = %last.outcome.as_str(),
                    "tool attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        last
    }

    async fn bump_stats(&self, tool: &str, outcome: ToolOutcome) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(tool.to_string()).or_default();
        entry.total += 1;
        match outcome {
            ToolOutcome::Success => entry.succeeded += 1,
            ToolOutcome::Failed => entry.failed += 1,
            ToolOutcome::TimedOut => entry.timed_out += 1,
            ToolOutcome::Denied => entry.denied += 1,
        }
    }
}

fn summarize(payload: &serde_json::Value) -> String {
    let text = payload.to_string();
    if text.len() <= SUMMARY_MAX_LEN {
        text
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < SUMMARY_MAX_LEN)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Tool, ToolSpec};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        async fn call(&self, parameters: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "echo": parameters }))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        async fn call(&self, _parameters: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::Value::Null)
        }
    }

    /// Fails until the given number of calls, then succeeds.
    struct FlakyTool {
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        async fn call(&self, _parameters: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.succeed_after {
                anyhow::bail!("transient backend error")
            }
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    fn fast_retry_spec(name: &str) -> ToolSpec {
        let mut spec = ToolSpec::new(name, "test")
            .with_roles([HandlerKind::Tier1, HandlerKind::Billing])
            .with_max_retries(2);
        spec.retry.base_delay_ms = 1;
        spec
    }

    fn dispatcher_with(specs: Vec<(ToolSpec, Arc<dyn Tool>)>) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        for (spec, handler) in specs {
            registry.register(spec, handler).unwrap();
        }
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn successful_dispatch_records_success() {
        let dispatcher = dispatcher_with(vec![(fast_retry_spec("echo"), Arc::new(EchoTool))]);

        let dispatch = dispatcher
            .dispatch(
                "echo",
                serde_json::json!({"q": 1}),
                HandlerKind::Tier1,
                None,
            )
            .await
            .unwrap();

        assert!(dispatch.result.is_success());
        assert_eq!(dispatch.record.outcome, ToolOutcome::Success);
        assert!(dispatch.record.completed_at.is_some());
        assert_eq!(dispatch.record.requested_by, HandlerKind::Tier1);

        let stats = dispatcher.stats_for("echo").await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn unauthorized_role_is_denied_without_execution() {
        let calls = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            succeed_after: 0,
        });
        let spec = ToolSpec::new("process_payment", "charge a card")
            .with_roles([HandlerKind::Billing])
            .must_not_retry();
        let dispatcher = dispatcher_with(vec![(spec, calls.clone() as Arc<dyn Tool>)]);

        let dispatch = dispatcher
            .dispatch(
                "process_payment",
                serde_json::json!({"amount": 120.0}),
                HandlerKind::Tier1,
                None,
            )
            .await
            .unwrap();

        assert_eq!(dispatch.result.outcome, ToolOutcome::Denied);
        assert_eq!(dispatch.record.outcome, ToolOutcome::Denied);
        // The underlying tool was never invoked.
        assert_eq!(calls.calls.load(Ordering::SeqCst), 0);

        let stats = dispatcher.stats_for("process_payment").await;
        assert_eq!(stats.denied, 1);
    }

    #[tokio::test]
    async fn safe_tool_retries_until_success() {
        let flaky = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            succeed_after: 2,
        });
        let dispatcher =
            dispatcher_with(vec![(fast_retry_spec("lookup"), flaky.clone() as Arc<dyn Tool>)]);

        let dispatch = dispatcher
            .dispatch("lookup", serde_json::json!({}), HandlerKind::Tier1, None)
            .await
            .unwrap();

        assert!(dispatch.result.is_success());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn must_not_retry_surfaces_first_failure() {
        let flaky = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            succeed_after: 1,
        });
        let spec = ToolSpec::new("charge", "x")
            .with_roles([HandlerKind::Billing])
            .must_not_retry();
        let dispatcher = dispatcher_with(vec![(spec, flaky.clone() as Arc<dyn Tool>)]);

        let dispatch = dispatcher
            .dispatch("charge", serde_json::json!({}), HandlerKind::Billing, None)
            .await
            .unwrap();

        assert_eq!(dispatch.result.outcome, ToolOutcome::Failed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
        assert!(dispatch
            .result
            .error_detail
            .as_deref()
            .unwrap()
            .contains("transient backend error"));
    }

    #[tokio::test]
    async fn timeout_yields_timed_out_outcome() {
        let mut spec = ToolSpec::new("slow", "x").with_roles([HandlerKind::Tier1]);
        spec.retry.max_retries = 0;
        let dispatcher = dispatcher_with(vec![(spec, Arc::new(SlowTool))]);

        let dispatch = dispatcher
            .dispatch(
                "slow",
                serde_json::json!({}),
                HandlerKind::Tier1,
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert_eq!(dispatch.result.outcome, ToolOutcome::TimedOut);
        assert_eq!(dispatch.record.outcome, ToolOutcome::TimedOut);
        let stats = dispatcher.stats_for("slow").await;
        assert_eq!(stats.timed_out, 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_caller_error() {
        let dispatcher = dispatcher_with(vec![]);
        let err = dispatcher
            .dispatch("ghost", serde_json::json!({}), HandlerKind::Tier1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn non_object_parameters_are_rejected() {
        let dispatcher = dispatcher_with(vec![(fast_retry_spec("echo"), Arc::new(EchoTool))]);
        let err = dispatcher
            .dispatch("echo", serde_json::json!([1, 2]), HandlerKind::Tier1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[test]
    fn summaries_are_bounded() {
        let long = serde_json::json!({ "data": "x".repeat(500) });
        let summary = summarize(&long);
        assert!(summary.chars().count() <= SUMMARY_MAX_LEN + 1);
    }
}

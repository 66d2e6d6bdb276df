//! Default tool catalog
//!
//! The contact-center tool set with its authorization, timeout, and retry
//! numbers. Payment-affecting tools are classified `must_not_retry`:
//! duplicating a charge is worse than surfacing a failure.

use crate::registry::ToolSpec;
use frontdesk_state::HandlerKind;

use HandlerKind::{Billing, Sales, Supervisor, Tier1, Tier2, Tier3};

const ALL_HANDLERS: [HandlerKind; 6] = [Tier1, Tier2, Tier3, Billing, Sales, Supervisor];

/// The default tool specs, to be paired with adapter implementations at
/// startup.
#[must_use]
pub fn default_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("get_customer_profile", "Retrieve customer profile information")
            .with_roles(ALL_HANDLERS)
            .with_timeout_secs(5)
            .with_max_retries(2),
        ToolSpec::new("search_knowledge_base", "Search internal knowledge base")
            .with_roles(ALL_HANDLERS)
            .with_timeout_secs(10)
            .with_max_retries(2),
        ToolSpec::new(
            "get_troubleshooting_guide",
            "Retrieve troubleshooting procedures",
        )
        .with_roles([Tier1, Tier2, Tier3])
        .with_timeout_secs(8)
        .with_max_retries(2),
        ToolSpec::new("create_ticket", "Create a new support ticket")
            .with_roles(ALL_HANDLERS)
            .with_timeout_secs(10)
            .with_max_retries(3),
        ToolSpec::new("update_ticket_status", "Update ticket status")
            .with_roles(ALL_HANDLERS)
            .with_timeout_secs(5)
            .with_max_retries(2),
        ToolSpec::new("run_diagnostic_test", "Run system diagnostics")
            .with_roles([Tier2, Tier3])
            .with_timeout_secs(30)
            .with_max_retries(1),
        ToolSpec::new("check_system_logs", "Analyze system logs")
            .with_roles([Tier2, Tier3])
            .with_timeout_secs(15)
            .with_max_retries(2),
        ToolSpec::new("get_billing_information", "Retrieve billing details")
            .with_roles([Billing, Supervisor])
            .with_timeout_secs(10)
            .with_max_retries(2),
        ToolSpec::new("process_payment", "Process customer payment")
            .with_roles([Billing])
            .with_timeout_secs(20)
            .must_not_retry(),
        ToolSpec::new("issue_refund", "Issue a refund to the customer")
            .with_roles([Billing, Supervisor])
            .with_timeout_secs(15)
            .must_not_retry(),
        ToolSpec::new(
            "send_customer_notification",
            "Send notification to customer",
        )
        .with_roles(ALL_HANDLERS)
        .with_timeout_secs(5)
        .with_max_retries(2),
        ToolSpec::new("log_interaction_metrics", "Log conversation metrics")
            .with_roles(ALL_HANDLERS)
            .with_timeout_secs(5)
            .with_max_retries(1),
    ]
}

//! Customer-profile collaborator boundary
//!
//! Profiles live in an external CRM. The engine snapshots the
//! routing-relevant fields into the conversation state with a staleness
//! timestamp; a stale or missing profile degrades the tier multiplier to
//! neutral rather than blocking the turn.

use chrono::Utc;
use frontdesk_state::{CustomerSnapshot, CustomerTier};
use serde::{Deserialize, Serialize};

/// Customer profile as returned by the external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// External customer id
    pub customer_id: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Account tier
    pub tier: CustomerTier,
    /// Account status string ("active", "suspended", ...)
    pub account_status: String,
    /// Lifetime value of the account
    pub lifetime_value: f64,
}

impl CustomerProfile {
    /// Snapshot the routing-relevant fields, stamped now.
    #[must_use]
    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            customer_id: self.customer_id.clone(),
            tier: self.tier,
            account_status: self.account_status.clone(),
            fetched_at: Utc::now(),
        }
    }
}

/// External customer-profile collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch a profile; `Ok(None)` when the customer is unknown.
    async fn fetch_profile(&self, customer_id: &str) -> anyhow::Result<Option<CustomerProfile>>;
}

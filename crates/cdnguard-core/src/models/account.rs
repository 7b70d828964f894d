//! Organization account and CDN distribution models

use serde::{Deserialize, Serialize};

/// Membership status of an account inside the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    /// Active member, eligible for monitoring
    #[default]
    Active,
    /// Suspended by the organization
    Suspended,
    /// Closure requested, not yet closed
    PendingClosure,
}

/// An account in the organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: String,

    /// Human-readable account name
    #[serde(default = "unknown_name")]
    pub name: String,

    /// Root email of the account
    #[serde(default = "unknown_email")]
    pub email: String,

    /// Organization membership status
    #[serde(default)]
    pub status: MembershipStatus,
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

fn unknown_email() -> String {
    "unknown@example.com".to_string()
}

impl Account {
    /// Create an active account
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            status: MembershipStatus::Active,
        }
    }

    /// Whether the account should be monitored
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }
}

/// One CDN resource unit owned by an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Distribution {
    /// Distribution identifier
    pub id: String,
    /// Owning account identifier
    pub account_id: String,
}

impl Distribution {
    /// Create a distribution reference
    pub fn new(id: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
        }
    }
}

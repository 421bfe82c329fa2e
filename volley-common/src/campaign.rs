//! Campaign model and lifecycle
//!
//! A campaign's counters are advisory: they feed dashboards and are
//! allowed to drift under crash/duplicate-claim conditions. Completion
//! is always decided from terminal task counts, never from counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CampaignId, RelayId};

/// Lifecycle states of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Sent,
    Cancelled,
}

impl CampaignStatus {
    /// Terminal states permit no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }

    /// Whether workers may claim and execute tasks for this campaign
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Sending)
    }

    /// Whether the campaign can still be cancelled
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Sent => "sent",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Advisory progress counters
///
/// `attempted` counts first terminal transitions; `delivered` and
/// `bounced` split it by outcome. Redelivered duplicates never bump
/// these (the executor guards on the first transition).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub attempted: u64,
    pub delivered: u64,
    pub bounced: u64,
}

/// A bulk campaign: one partition of delivery tasks bound to a relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub relay: RelayId,
    pub status: CampaignStatus,
    /// Number of delivery tasks created at distribution time
    pub recipient_total: u64,
    pub counters: CampaignCounters,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a campaign ready for distribution
    #[must_use]
    pub fn new(id: CampaignId, name: impl Into<String>, relay: RelayId) -> Self {
        Self {
            id,
            name: name.into(),
            relay,
            status: CampaignStatus::Draft,
            recipient_total: 0,
            counters: CampaignCounters::default(),
            created_at: Utc::now(),
        }
    }
}

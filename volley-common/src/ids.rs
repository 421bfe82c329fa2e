//! Identifier newtypes for campaigns, recipients, and relays
//!
//! All identifiers are ULIDs: lexicographically sortable by creation
//! time and collision-resistant, so they can double as stable map keys
//! and file names.

use serde::{Deserialize, Serialize};

/// Identifier for a campaign
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CampaignId(ulid::Ulid);

/// Identifier for a recipient
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecipientId(ulid::Ulid);

/// Identifier for an outbound relay
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RelayId(ulid::Ulid);

macro_rules! ulid_id {
    ($name:ident) => {
        impl $name {
            /// Create an identifier from an existing ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self(id)
            }

            /// Generate a new unique identifier
            #[must_use]
            pub fn generate() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the underlying ULID
            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(Self)
            }
        }
    };
}

ulid_id!(CampaignId);
ulid_id!(RecipientId);
ulid_id!(RelayId);

/// Unique key of a delivery task: one per (campaign, recipient) pair
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskKey {
    pub campaign: CampaignId,
    pub recipient: RecipientId,
}

impl TaskKey {
    #[must_use]
    pub const fn new(campaign: CampaignId, recipient: RecipientId) -> Self {
        Self {
            campaign,
            recipient,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.campaign, self.recipient)
    }
}

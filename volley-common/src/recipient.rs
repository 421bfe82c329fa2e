//! Recipient model and reachability state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{address::EmailAddress, ids::RecipientId};

/// Whether a recipient may be mailed, and why not if not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Active,
    Unsubscribed,
    /// Hard-bounced; cleared only by an administrative action
    Bounced,
    Blacklisted,
    Complained,
}

impl Reachability {
    /// Only active recipients receive delivery tasks
    #[must_use]
    pub const fn is_deliverable(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A recipient of bulk campaigns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub email: EmailAddress,
    pub reachability: Reachability,
    pub bounce_count: u32,
    pub last_bounce_at: Option<DateTime<Utc>>,
}

impl Recipient {
    /// Create an active recipient with no bounce history
    #[must_use]
    pub const fn new(id: RecipientId, email: EmailAddress) -> Self {
        Self {
            id,
            email,
            reachability: Reachability::Active,
            bounce_count: 0,
            last_bounce_at: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_deliverable() {
        assert!(Reachability::Active.is_deliverable());
        assert!(!Reachability::Unsubscribed.is_deliverable());
        assert!(!Reachability::Bounced.is_deliverable());
        assert!(!Reachability::Blacklisted.is_deliverable());
        assert!(!Reachability::Complained.is_deliverable());
    }

    #[test]
    fn test_new_recipient_is_clean() {
        let recipient = Recipient::new(
            RecipientId::generate(),
            EmailAddress::parse("user@example.com").unwrap(),
        );
        assert_eq!(recipient.reachability, Reachability::Active);
        assert_eq!(recipient.bounce_count, 0);
        assert!(recipient.last_bounce_at.is_none());
    }
}

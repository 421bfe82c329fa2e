//! Outbound relay configuration
//!
//! A relay is a submission endpoint with its own throughput quota,
//! expressed as up to four independent trailing-window tiers. A tier
//! with no configured limit is unlimited.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{address::EmailAddress, ids::RelayId};

/// The four rate-limit windows, in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Second,
    Minute,
    Hour,
    Day,
}

impl Tier {
    /// All tiers in increasing window order; admission checks walk this
    pub const ALL: [Self; 4] = [Self::Second, Self::Minute, Self::Hour, Self::Day];

    /// Length of the trailing window for this tier
    #[must_use]
    pub const fn window(self) -> Duration {
        match self {
            Self::Second => Duration::from_secs(1),
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
            Self::Day => Duration::from_secs(86400),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier attempt thresholds; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RelayLimits {
    #[serde(default)]
    pub per_second: Option<u32>,
    #[serde(default)]
    pub per_minute: Option<u32>,
    #[serde(default)]
    pub per_hour: Option<u32>,
    #[serde(default)]
    pub per_day: Option<u32>,
}

impl RelayLimits {
    /// The configured limit for a tier, if any
    #[must_use]
    pub const fn limit_for(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Second => self.per_second,
            Tier::Minute => self.per_minute,
            Tier::Hour => self.per_hour,
            Tier::Day => self.per_day,
        }
    }

    /// Tiers that actually carry a limit, in increasing window order
    pub fn configured(&self) -> impl Iterator<Item = (Tier, u32)> + '_ {
        Tier::ALL
            .into_iter()
            .filter_map(|tier| self.limit_for(tier).map(|limit| (tier, limit)))
    }
}

const fn default_active() -> bool {
    true
}

/// Configuration of one outbound relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub id: RelayId,
    pub name: String,

    /// Inactive relays admit nothing
    #[serde(default = "default_active")]
    pub active: bool,

    /// Ordered pool of from-addresses rotated per attempt
    pub senders: Vec<EmailAddress>,

    #[serde(default)]
    pub limits: RelayLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_windows() {
        assert_eq!(Tier::Second.window(), Duration::from_secs(1));
        assert_eq!(Tier::Minute.window(), Duration::from_secs(60));
        assert_eq!(Tier::Hour.window(), Duration::from_secs(3600));
        assert_eq!(Tier::Day.window(), Duration::from_secs(86400));
    }

    #[test]
    fn test_configured_tiers_in_window_order() {
        let limits = RelayLimits {
            per_second: None,
            per_minute: Some(100),
            per_hour: None,
            per_day: Some(5000),
        };

        let configured: Vec<_> = limits.configured().collect();
        assert_eq!(configured, vec![(Tier::Minute, 100), (Tier::Day, 5000)]);
    }

    #[test]
    fn test_unconfigured_limits_are_unlimited() {
        let limits = RelayLimits::default();
        assert!(limits.configured().next().is_none());
    }
}

//! Per-relay admission control over four trailing-window tiers
//!
//! Second, minute, and hour tiers are counted from the append-only
//! attempt log within `[now - window, now]`. The day tier reads the
//! relay's calendar-day counter — a counter reset at the date boundary
//! rather than a rolling 24-hour window, a deliberate simplification
//! the provider-side enforcement shares.
//!
//! A blocked check is backpressure, not an error: the caller defers the
//! task and the worker sleeps.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use volley_common::{address::EmailAddress, relay::Tier};

use crate::{attempt_log::AttemptLog, relay_state::RelayHandle, rotator::SenderRotator};

/// Result of one admission check
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub allowed: bool,

    /// The first tier (in increasing window order) found at its limit
    pub blocking_tier: Option<Tier>,

    /// Remaining quota: zero when blocked, the tightest tier's
    /// remainder when allowed, `None` when every tier is unlimited
    pub available: Option<u64>,

    /// How long the caller should back off when blocked
    pub suggested_wait: Option<Duration>,
}

impl RateLimitStatus {
    fn allowed(available: Option<u64>) -> Self {
        Self {
            allowed: true,
            blocking_tier: None,
            available,
            suggested_wait: None,
        }
    }

    fn blocked(tier: Option<Tier>, wait: Option<Duration>) -> Self {
        Self {
            allowed: false,
            blocking_tier: tier,
            available: Some(0),
            suggested_wait: wait,
        }
    }
}

/// Usage of one tier, for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct TierUsage {
    pub tier: Tier,
    pub limit: Option<u32>,
    pub current: u64,
    pub available: Option<u64>,
    pub percent: Option<f64>,
}

/// Admission gate evaluated before every delivery attempt
#[derive(Debug, Clone)]
pub struct RateLimiter {
    log: Arc<AttemptLog>,
    rotator: Arc<SenderRotator>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(log: Arc<AttemptLog>, rotator: Arc<SenderRotator>) -> Self {
        Self { log, rotator }
    }

    /// Check whether `relay` may take another attempt right now
    ///
    /// When `sender` is given, its quarantine state participates in the
    /// decision as well.
    #[must_use]
    pub fn check(&self, relay: &RelayHandle, sender: Option<&EmailAddress>) -> RateLimitStatus {
        self.check_at(relay, sender, SystemTime::now(), Utc::now())
    }

    /// Window-count evaluation against an explicit clock
    #[must_use]
    pub fn check_at(
        &self,
        relay: &RelayHandle,
        sender: Option<&EmailAddress>,
        now: SystemTime,
        today: DateTime<Utc>,
    ) -> RateLimitStatus {
        if !relay.config.active {
            return RateLimitStatus::blocked(None, None);
        }

        if let Some(address) = sender
            && self.rotator.is_paused(relay.config.id, address, now)
        {
            let wait = self.rotator.pause_remaining(relay.config.id, address, now);
            return RateLimitStatus::blocked(None, wait);
        }

        let mut tightest: Option<u64> = None;

        for (tier, limit) in relay.config.limits.configured() {
            let current = self.tier_count(relay, tier, now, today);

            if current >= u64::from(limit) {
                return RateLimitStatus::blocked(Some(tier), Some(tier.window()));
            }

            let remaining = u64::from(limit) - current;
            tightest = Some(tightest.map_or(remaining, |t| t.min(remaining)));
        }

        RateLimitStatus::allowed(tightest)
    }

    /// Usage across all four tiers, for the status surface
    #[must_use]
    pub fn usage(&self, relay: &RelayHandle, now: SystemTime, today: DateTime<Utc>) -> Vec<TierUsage> {
        Tier::ALL
            .into_iter()
            .map(|tier| {
                let current = self.tier_count(relay, tier, now, today);
                let limit = relay.config.limits.limit_for(tier);
                let available = limit.map(|l| u64::from(l).saturating_sub(current));
                let percent = limit.filter(|&l| l > 0).map(|l| {
                    #[allow(
                        clippy::cast_precision_loss,
                        reason = "Display percentage only"
                    )]
                    let ratio = current as f64 / f64::from(l);
                    (ratio * 100.0).min(100.0)
                });

                TierUsage {
                    tier,
                    limit,
                    current,
                    available,
                    percent,
                }
            })
            .collect()
    }

    fn tier_count(
        &self,
        relay: &RelayHandle,
        tier: Tier,
        now: SystemTime,
        today: DateTime<Utc>,
    ) -> u64 {
        match tier {
            Tier::Day => relay.day_count(today.date_naive()),
            Tier::Second | Tier::Minute | Tier::Hour => {
                let since = now - tier.window();
                let count = self.log.count_for_relay(relay.config.id, since, now);
                u64::try_from(count).unwrap_or(u64::MAX)
            }
        }
    }
}

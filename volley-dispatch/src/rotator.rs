//! Sender rotation and per-address quarantine
//!
//! Rotation itself lives on [`RelayHandle`](crate::RelayHandle) (the
//! cursor is relay state); this module adds the quarantine layer: a
//! self-expiring pause marker per (relay, address). Markers are never
//! cleaned up — an expired marker simply reads as absent.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tracing::info;
use volley_common::{address::EmailAddress, ids::RelayId};

use crate::{error::ConfigurationError, relay_state::RelayHandle};

#[derive(Debug, Clone)]
struct PauseMarker {
    until: SystemTime,
    reason: String,
}

/// Round-robin sender selection with temporary quarantine
#[derive(Debug, Default)]
pub struct SenderRotator {
    paused: DashMap<(RelayId, EmailAddress), PauseMarker>,
}

impl SenderRotator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next sender from the relay's pool
    ///
    /// # Errors
    /// Propagates [`ConfigurationError`] from the relay when the pool
    /// is unusable.
    pub fn next_sender(&self, relay: &RelayHandle) -> Result<EmailAddress, ConfigurationError> {
        relay.rotate_sender()
    }

    /// Quarantine an address for `duration`
    ///
    /// The marker expires on its own; there is no explicit unpause.
    pub fn pause(
        &self,
        relay: RelayId,
        address: EmailAddress,
        duration: Duration,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        info!(
            relay = %relay,
            address = %address,
            duration_secs = duration.as_secs(),
            reason = %reason,
            "Quarantining sender address"
        );
        self.paused.insert(
            (relay, address),
            PauseMarker {
                until: SystemTime::now() + duration,
                reason,
            },
        );
    }

    /// Whether an address is currently quarantined
    ///
    /// Expired markers are treated as absent without being removed.
    #[must_use]
    pub fn is_paused(&self, relay: RelayId, address: &EmailAddress, now: SystemTime) -> bool {
        self.paused
            .get(&(relay, address.clone()))
            .is_some_and(|marker| marker.until > now)
    }

    /// The reason an address is quarantined, if it currently is
    #[must_use]
    pub fn pause_reason(
        &self,
        relay: RelayId,
        address: &EmailAddress,
        now: SystemTime,
    ) -> Option<String> {
        self.paused
            .get(&(relay, address.clone()))
            .filter(|marker| marker.until > now)
            .map(|marker| marker.reason.clone())
    }

    /// Time left on an address's quarantine, if any
    #[must_use]
    pub fn pause_remaining(
        &self,
        relay: RelayId,
        address: &EmailAddress,
        now: SystemTime,
    ) -> Option<Duration> {
        self.paused
            .get(&(relay, address.clone()))
            .and_then(|marker| marker.until.duration_since(now).ok())
            .filter(|remaining| !remaining.is_zero())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::{ids::RelayId, relay::{RelayConfig, RelayLimits}};

    use super::*;

    fn address(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).unwrap()
    }

    fn relay_handle(senders: &[&str]) -> RelayHandle {
        RelayHandle::new(RelayConfig {
            id: RelayId::generate(),
            name: "test".to_string(),
            active: true,
            senders: senders.iter().map(|s| address(s)).collect(),
            limits: RelayLimits::default(),
        })
    }

    #[test]
    fn test_next_sender_round_robin() {
        let rotator = SenderRotator::new();
        let relay = relay_handle(&["a@example.com", "b@example.com", "c@example.com"]);

        let picked: Vec<String> = (0..4)
            .map(|_| rotator.next_sender(&relay).unwrap().to_string())
            .collect();
        assert_eq!(
            picked,
            vec![
                "a@example.com",
                "b@example.com",
                "c@example.com",
                "a@example.com"
            ]
        );
    }

    #[test]
    fn test_pause_expires_without_cleanup() {
        let rotator = SenderRotator::new();
        let relay = RelayId::generate();
        let addr = address("a@example.com");
        let now = SystemTime::now();

        rotator.pause(relay, addr.clone(), Duration::from_secs(60), "bounce spike");

        assert!(rotator.is_paused(relay, &addr, now));
        assert_eq!(
            rotator.pause_reason(relay, &addr, now).as_deref(),
            Some("bounce spike")
        );

        // Past expiry: marker reads as absent, nothing was removed
        let later = now + Duration::from_secs(120);
        assert!(!rotator.is_paused(relay, &addr, later));
        assert!(rotator.pause_reason(relay, &addr, later).is_none());
    }

    #[test]
    fn test_unpaused_address_reads_absent() {
        let rotator = SenderRotator::new();
        let relay = RelayId::generate();
        assert!(!rotator.is_paused(relay, &address("a@example.com"), SystemTime::now()));
    }

    #[test]
    fn test_pause_is_scoped_to_relay() {
        let rotator = SenderRotator::new();
        let relay_a = RelayId::generate();
        let relay_b = RelayId::generate();
        let addr = address("shared@example.com");
        let now = SystemTime::now();

        rotator.pause(relay_a, addr.clone(), Duration::from_secs(60), "spike");

        assert!(rotator.is_paused(relay_a, &addr, now));
        assert!(!rotator.is_paused(relay_b, &addr, now));
    }
}

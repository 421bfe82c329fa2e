//! Type definitions for queue partitions and entries

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use volley_common::ids::{CampaignId, TaskKey};

/// Identifier of a queue partition
///
/// The observed design keeps one partition per campaign, so a partition
/// id is a campaign id under a different name — the queue layer never
/// interprets it beyond equality and ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(CampaignId);

impl PartitionId {
    #[must_use]
    pub const fn new(campaign: CampaignId) -> Self {
        Self(campaign)
    }

    /// The campaign this partition belongs to
    #[must_use]
    pub const fn campaign(&self) -> CampaignId {
        self.0
    }
}

impl From<CampaignId> for PartitionId {
    fn from(campaign: CampaignId) -> Self {
        Self(campaign)
    }
}

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PartitionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<CampaignId>().map(Self)
    }
}

/// One queued delivery task awaiting a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub partition: PartitionId,

    /// Strictly increasing within the partition; never reused, and the
    /// sequence survives the partition being drained.
    pub sort_key: u64,

    /// The delivery task this entry schedules
    pub task: TaskKey,

    /// Set while a worker holds the claim; cleared on release or by the
    /// lease reaper.
    pub claimed_at: Option<SystemTime>,

    /// Number of times this entry has been claimed
    pub attempt_count: u32,

    pub enqueued_at: SystemTime,
}

impl QueueEntry {
    #[must_use]
    pub fn new(partition: PartitionId, sort_key: u64, task: TaskKey) -> Self {
        Self {
            partition,
            sort_key,
            task,
            claimed_at: None,
            attempt_count: 0,
            enqueued_at: SystemTime::now(),
        }
    }

    /// Whether a worker currently holds this entry
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Whether the claim (if any) is older than the lease TTL
    #[must_use]
    pub fn claim_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        self.claimed_at
            .is_some_and(|at| now.duration_since(at).is_ok_and(|age| age > ttl))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::ids::RecipientId;

    use super::*;

    fn entry() -> QueueEntry {
        let campaign = CampaignId::generate();
        QueueEntry::new(
            PartitionId::new(campaign),
            1,
            TaskKey::new(campaign, RecipientId::generate()),
        )
    }

    #[test]
    fn test_new_entry_is_unclaimed() {
        let entry = entry();
        assert!(!entry.is_claimed());
        assert_eq!(entry.attempt_count, 0);
    }

    #[test]
    fn test_claim_expiry() {
        let mut entry = entry();
        let now = SystemTime::now();
        let ttl = Duration::from_secs(300);

        // Unclaimed entries never expire
        assert!(!entry.claim_expired(ttl, now));

        // Fresh claim: within the lease
        entry.claimed_at = Some(now);
        assert!(!entry.claim_expired(ttl, now + Duration::from_secs(10)));

        // Stale claim: past the lease
        assert!(entry.claim_expired(ttl, now + Duration::from_secs(301)));
    }

    #[test]
    fn test_partition_id_round_trip() {
        let partition = PartitionId::new(CampaignId::generate());
        let parsed: PartitionId = partition.to_string().parse().unwrap();
        assert_eq!(partition, parsed);
    }
}

//! Storage trait for the partitioned delivery queue

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use volley_common::ids::TaskKey;

use crate::types::{PartitionId, QueueEntry};

/// Backing store for the partitioned delivery queue
///
/// Implementations guarantee:
/// - `enqueue` assigns sort keys that strictly increase per partition
///   and are never reused, even after the partition drains;
/// - `claim` hands out each entry to at most one worker at a time, in
///   ascending sort-key order, under the partition's exclusive lock;
/// - an empty partition is not an error — `claim` returns `Ok(None)`.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Append a task to the partition, returning the assigned sort key
    ///
    /// # Errors
    /// If the entry cannot be recorded by the backing store
    async fn enqueue(&self, partition: PartitionId, task: TaskKey) -> crate::Result<u64>;

    /// Claim the lowest unclaimed entry of the partition
    ///
    /// Stamps `claimed_at` and increments `attempt_count` atomically
    /// with the selection. Returns `Ok(None)` when nothing is claimable.
    ///
    /// # Errors
    /// If the claim cannot be persisted
    async fn claim(&self, partition: PartitionId) -> crate::Result<Option<QueueEntry>>;

    /// Give a claimed entry back without resolving it
    ///
    /// Used for rate-limit deferral: the entry stays pending and keeps
    /// its sort key, so it is next in line once the relay admits again.
    ///
    /// # Errors
    /// If the entry does not exist or the release cannot be persisted
    async fn release(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()>;

    /// Resolve a claimed entry after a successful attempt
    ///
    /// # Errors
    /// If the removal cannot be persisted
    async fn ack(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()>;

    /// Resolve a claimed entry after a failed attempt
    ///
    /// The durable record of the failure lives in the task table and
    /// attempt log; the queue entry itself is deleted either way.
    ///
    /// # Errors
    /// If the removal cannot be persisted
    async fn fail(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()>;

    /// Clear claims older than `ttl`, returning the reclaimed entries
    ///
    /// This is the lease mechanism that lets another worker pick up
    /// work abandoned by a crashed claimant.
    ///
    /// # Errors
    /// If reclaimed entries cannot be persisted
    async fn reclaim_expired(
        &self,
        ttl: Duration,
        now: SystemTime,
    ) -> crate::Result<Vec<QueueEntry>>;

    /// Remove all unclaimed entries of a partition
    ///
    /// Claimed entries survive: a task already running at cancellation
    /// time runs to completion and resolves normally.
    ///
    /// # Errors
    /// If removals cannot be persisted
    async fn purge(&self, partition: PartitionId) -> crate::Result<usize>;

    /// Remove all unclaimed entries across every partition
    ///
    /// # Errors
    /// If removals cannot be persisted
    async fn purge_all(&self) -> crate::Result<usize>;

    /// Number of unclaimed entries in a partition
    ///
    /// # Errors
    /// If the backing store cannot be read
    async fn backlog(&self, partition: PartitionId) -> crate::Result<usize>;

    /// Partitions currently known to the store
    ///
    /// # Errors
    /// If the backing store cannot be read
    async fn partitions(&self) -> crate::Result<Vec<PartitionId>>;

    /// Total entries (claimed and unclaimed) across all partitions
    ///
    /// # Errors
    /// If the backing store cannot be read
    async fn len(&self) -> crate::Result<usize>;
}

//! In-memory queue store
//!
//! Each partition is a `BTreeMap` ordered by sort key behind its own
//! mutex — the mutex is the "row-exclusive lock" of the claim
//! protocol. The per-partition high-water mark lives beside the map so
//! sort keys keep growing after the partition drains.
//!
//! Primarily used by tests and transient deployments; durable setups
//! use [`super::FileQueueStore`], which wraps the same partition state.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use volley_common::ids::TaskKey;

use crate::{
    r#trait::QueueStore,
    types::{PartitionId, QueueEntry},
};

/// Mutable state of one partition, guarded by the partition mutex
#[derive(Debug, Default)]
pub(crate) struct PartitionState {
    /// Highest sort key ever assigned; never decreases
    pub(crate) high_water: u64,
    pub(crate) entries: BTreeMap<u64, QueueEntry>,
}

impl PartitionState {
    /// Assign the next sort key and insert the entry
    pub(crate) fn push(&mut self, partition: PartitionId, task: TaskKey) -> u64 {
        // The high-water mark dominates any key still in the map, so
        // draining the partition never resets the sequence.
        let sort_key = self
            .high_water
            .max(self.entries.last_key_value().map_or(0, |(k, _)| *k))
            + 1;
        self.high_water = sort_key;
        self.entries
            .insert(sort_key, QueueEntry::new(partition, sort_key, task));
        sort_key
    }

    /// Claim the lowest unclaimed entry, stamping it in place
    pub(crate) fn claim_next(&mut self, now: SystemTime) -> Option<QueueEntry> {
        let entry = self
            .entries
            .values_mut()
            .find(|entry| !entry.is_claimed())?;
        entry.claimed_at = Some(now);
        entry.attempt_count += 1;
        Some(entry.clone())
    }

    pub(crate) fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.is_claimed())
            .count()
    }

    /// Drop unclaimed entries, returning their sort keys
    pub(crate) fn drain_unclaimed(&mut self) -> Vec<u64> {
        let keys: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_claimed())
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    /// Clear claims older than the lease, returning the freed entries
    pub(crate) fn reclaim(&mut self, ttl: Duration, now: SystemTime) -> Vec<QueueEntry> {
        self.entries
            .values_mut()
            .filter(|entry| entry.claim_expired(ttl, now))
            .map(|entry| {
                entry.claimed_at = None;
                entry.clone()
            })
            .collect()
    }
}

/// In-memory implementation of [`QueueStore`]
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    pub(crate) partitions: Arc<DashMap<PartitionId, Arc<Mutex<PartitionState>>>>,
}

impl MemoryQueueStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(DashMap::new()),
        }
    }

    fn partition(&self, partition: PartitionId) -> Arc<Mutex<PartitionState>> {
        self.partitions
            .entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(PartitionState::default())))
            .clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, partition: PartitionId, task: TaskKey) -> crate::Result<u64> {
        let state = self.partition(partition);
        let sort_key = state.lock().push(partition, task);
        Ok(sort_key)
    }

    async fn claim(&self, partition: PartitionId) -> crate::Result<Option<QueueEntry>> {
        let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) else {
            return Ok(None);
        };
        Ok(state.lock().claim_next(SystemTime::now()))
    }

    async fn release(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        let state = self
            .partitions
            .get(&partition)
            .map(|state| Arc::clone(&state))
            .ok_or(crate::QueueError::NotFound {
                partition,
                sort_key,
            })?;
        let mut state = state.lock();
        let entry = state
            .entries
            .get_mut(&sort_key)
            .ok_or(crate::QueueError::NotFound {
                partition,
                sort_key,
            })?;
        entry.claimed_at = None;
        Ok(())
    }

    async fn ack(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        if let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) {
            state.lock().entries.remove(&sort_key);
        }
        Ok(())
    }

    async fn fail(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        // Same resolution as `ack`: the failure record lives in the
        // task table, not the queue.
        self.ack(partition, sort_key).await
    }

    async fn reclaim_expired(
        &self,
        ttl: Duration,
        now: SystemTime,
    ) -> crate::Result<Vec<QueueEntry>> {
        let mut reclaimed = Vec::new();
        for state in self.partitions.iter() {
            let state = state.value().clone();
            reclaimed.extend(state.lock().reclaim(ttl, now));
        }
        Ok(reclaimed)
    }

    async fn purge(&self, partition: PartitionId) -> crate::Result<usize> {
        let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) else {
            return Ok(0);
        };
        Ok(state.lock().drain_unclaimed().len())
    }

    async fn purge_all(&self) -> crate::Result<usize> {
        let mut removed = 0;
        for state in self.partitions.iter() {
            let state = state.value().clone();
            removed += state.lock().drain_unclaimed().len();
        }
        Ok(removed)
    }

    async fn backlog(&self, partition: PartitionId) -> crate::Result<usize> {
        Ok(self
            .partitions
            .get(&partition)
            .map_or(0, |state| state.lock().pending()))
    }

    async fn partitions(&self) -> crate::Result<Vec<PartitionId>> {
        Ok(self.partitions.iter().map(|entry| *entry.key()).collect())
    }

    async fn len(&self) -> crate::Result<usize> {
        Ok(self
            .partitions
            .iter()
            .map(|state| state.value().lock().entries.len())
            .sum())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::ids::{CampaignId, RecipientId};

    use super::*;

    fn task(campaign: CampaignId) -> TaskKey {
        TaskKey::new(campaign, RecipientId::generate())
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_sort_keys() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        let first = store.enqueue(partition, task(campaign)).await.unwrap();
        let second = store.enqueue(partition, task(campaign)).await.unwrap();
        let third = store.enqueue(partition, task(campaign)).await.unwrap();

        assert_eq!((first, second, third), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_sort_keys_survive_draining() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        store.enqueue(partition, task(campaign)).await.unwrap();
        store.enqueue(partition, task(campaign)).await.unwrap();

        // Drain the partition completely
        while let Some(entry) = store.claim(partition).await.unwrap() {
            store.ack(partition, entry.sort_key).await.unwrap();
        }
        assert_eq!(store.backlog(partition).await.unwrap(), 0);

        // Keys continue past the drained maximum — no reuse
        let next = store.enqueue(partition, task(campaign)).await.unwrap();
        assert_eq!(next, 3);
    }

    #[tokio::test]
    async fn test_claim_in_sort_key_order() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        for _ in 0..5 {
            store.enqueue(partition, task(campaign)).await.unwrap();
        }

        let mut claimed = Vec::new();
        while let Some(entry) = store.claim(partition).await.unwrap() {
            claimed.push(entry.sort_key);
            store.ack(partition, entry.sort_key).await.unwrap();
        }

        assert_eq!(claimed, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        store.enqueue(partition, task(campaign)).await.unwrap();

        let first = store.claim(partition).await.unwrap();
        assert!(first.is_some());

        // The only entry is claimed; a second claim finds nothing
        let second = store.claim(partition).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_empty_partition_is_no_work_not_error() {
        let store = MemoryQueueStore::new();
        let partition = PartitionId::new(CampaignId::generate());
        assert!(store.claim(partition).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_returns_entry_to_pool() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        store.enqueue(partition, task(campaign)).await.unwrap();
        let entry = store.claim(partition).await.unwrap().unwrap();
        assert_eq!(entry.attempt_count, 1);

        store.release(partition, entry.sort_key).await.unwrap();

        // Same entry comes back, attempt count grows
        let again = store.claim(partition).await.unwrap().unwrap();
        assert_eq!(again.sort_key, entry.sort_key);
        assert_eq!(again.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_reclaim_expired_frees_stale_claims() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        store.enqueue(partition, task(campaign)).await.unwrap();
        let entry = store.claim(partition).await.unwrap().unwrap();

        // Within the lease: nothing to reclaim
        let now = SystemTime::now();
        let ttl = Duration::from_secs(300);
        assert!(store.reclaim_expired(ttl, now).await.unwrap().is_empty());
        assert!(store.claim(partition).await.unwrap().is_none());

        // Past the lease: the entry is claimable again
        let later = now + Duration::from_secs(301);
        let reclaimed = store.reclaim_expired(ttl, later).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].sort_key, entry.sort_key);

        let again = store.claim(partition).await.unwrap().unwrap();
        assert_eq!(again.sort_key, entry.sort_key);
        assert_eq!(again.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_purge_spares_claimed_entries() {
        let store = MemoryQueueStore::new();
        let campaign = CampaignId::generate();
        let partition = PartitionId::new(campaign);

        for _ in 0..3 {
            store.enqueue(partition, task(campaign)).await.unwrap();
        }
        let claimed = store.claim(partition).await.unwrap().unwrap();

        let removed = store.purge(partition).await.unwrap();
        assert_eq!(removed, 2);

        // The in-flight entry is still there and resolves normally
        assert_eq!(store.len().await.unwrap(), 1);
        store.ack(partition, claimed.sort_key).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }
}

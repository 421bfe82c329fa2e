//! File-backed queue store
//!
//! Layout mirrors the spool convention of one bincode file per record:
//!
//! ```text
//! <root>/
//!   <partition>/                  one directory per partition (ULID)
//!     high_water.meta             bincode u64, the sort-key high-water mark
//!     00000000000000000001.task   bincode QueueEntry
//!     00000000000000000002.task
//! ```
//!
//! The in-memory index is authoritative at runtime; files are written
//! through on every mutation so a restart (or another process reading
//! the directory) sees current claim state. Claims found on disk at
//! open time are kept as-is — the lease reaper frees them once their
//! TTL runs out, which is exactly the crashed-worker story.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use volley_common::ids::TaskKey;

use crate::{
    QueueError,
    backends::memory::PartitionState,
    r#trait::QueueStore,
    types::{PartitionId, QueueEntry},
};

const META_FILE: &str = "high_water.meta";
const TASK_EXTENSION: &str = "task";

/// File-backed implementation of [`QueueStore`]
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    root: PathBuf,
    partitions: Arc<DashMap<PartitionId, Arc<Mutex<PartitionState>>>>,
}

impl FileQueueStore {
    /// Open (or create) a store rooted at `root`, restoring any
    /// persisted partitions
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created or
    /// read. Individual entry files that fail to decode are skipped
    /// with a warning rather than failing the whole restore.
    pub async fn open(root: impl AsRef<Path>) -> crate::Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let partitions = DashMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;

        while let Some(dir_entry) = dir.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }

            let name = dir_entry.file_name();
            let Some(partition) = name.to_str().and_then(|n| n.parse::<PartitionId>().ok())
            else {
                warn!(path = %dir_entry.path().display(), "Skipping non-partition directory in queue root");
                continue;
            };

            let state = Self::restore_partition(&dir_entry.path()).await?;
            partitions.insert(partition, Arc::new(Mutex::new(state)));
        }

        Ok(Self {
            root,
            partitions: Arc::new(partitions),
        })
    }

    async fn restore_partition(path: &Path) -> crate::Result<PartitionState> {
        let mut state = PartitionState::default();

        let meta_path = path.join(META_FILE);
        if let Ok(bytes) = tokio::fs::read(&meta_path).await {
            match bincode::serde::decode_from_slice::<u64, _>(&bytes, bincode::config::standard())
            {
                Ok((high_water, _)) => state.high_water = high_water,
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "Unreadable high-water meta, deriving from entries");
                }
            }
        }

        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(file) = dir.next_entry().await? {
            let file_path = file.path();
            if file_path.extension().and_then(|e| e.to_str()) != Some(TASK_EXTENSION) {
                continue;
            }

            let bytes = tokio::fs::read(&file_path).await?;
            match bincode::serde::decode_from_slice::<QueueEntry, _>(
                &bytes,
                bincode::config::standard(),
            ) {
                Ok((entry, _)) => {
                    state.high_water = state.high_water.max(entry.sort_key);
                    state.entries.insert(entry.sort_key, entry);
                }
                Err(e) => {
                    warn!(path = %file_path.display(), error = %e, "Skipping undecodable queue entry file");
                }
            }
        }

        Ok(state)
    }

    fn partition_dir(&self, partition: PartitionId) -> PathBuf {
        self.root.join(partition.to_string())
    }

    fn entry_path(&self, partition: PartitionId, sort_key: u64) -> PathBuf {
        self.partition_dir(partition)
            .join(format!("{sort_key:020}.{TASK_EXTENSION}"))
    }

    fn partition(&self, partition: PartitionId) -> Arc<Mutex<PartitionState>> {
        self.partitions
            .entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(PartitionState::default())))
            .clone()
    }

    async fn persist_entry(&self, entry: &QueueEntry) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(crate::SerializationError::from)?;
        tokio::fs::write(self.entry_path(entry.partition, entry.sort_key), bytes).await?;
        Ok(())
    }

    async fn persist_high_water(
        &self,
        partition: PartitionId,
        high_water: u64,
    ) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(&high_water, bincode::config::standard())
            .map_err(crate::SerializationError::from)?;
        tokio::fs::write(self.partition_dir(partition).join(META_FILE), bytes).await?;
        Ok(())
    }

    async fn remove_entry_file(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        match tokio::fs::remove_file(self.entry_path(partition, sort_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, partition: PartitionId, task: TaskKey) -> crate::Result<u64> {
        tokio::fs::create_dir_all(self.partition_dir(partition)).await?;

        let state = self.partition(partition);
        let mut state = state.lock().await;

        let sort_key = state.push(partition, task);
        let entry = state
            .entries
            .get(&sort_key)
            .cloned()
            .ok_or_else(|| QueueError::Internal("Entry vanished during enqueue".to_string()))?;

        if let Err(e) = self.persist_entry(&entry).await {
            state.entries.remove(&sort_key);
            return Err(e);
        }
        self.persist_high_water(partition, state.high_water).await?;

        Ok(sort_key)
    }

    async fn claim(&self, partition: PartitionId) -> crate::Result<Option<QueueEntry>> {
        let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) else {
            return Ok(None);
        };
        let mut state = state.lock().await;

        let Some(entry) = state.claim_next(SystemTime::now()) else {
            return Ok(None);
        };

        if let Err(e) = self.persist_entry(&entry).await {
            // Undo the claim so the entry is not stranded until the
            // reaper finds it.
            if let Some(stored) = state.entries.get_mut(&entry.sort_key) {
                stored.claimed_at = None;
                stored.attempt_count = stored.attempt_count.saturating_sub(1);
            }
            return Err(e);
        }

        Ok(Some(entry))
    }

    async fn release(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        let state = self
            .partitions
            .get(&partition)
            .map(|state| Arc::clone(&state))
            .ok_or(QueueError::NotFound {
                partition,
                sort_key,
            })?;
        let mut state = state.lock().await;

        let entry = state
            .entries
            .get_mut(&sort_key)
            .ok_or(QueueError::NotFound {
                partition,
                sort_key,
            })?;
        entry.claimed_at = None;
        let entry = entry.clone();

        self.persist_entry(&entry).await
    }

    async fn ack(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        if let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) {
            state.lock().await.entries.remove(&sort_key);
        }
        self.remove_entry_file(partition, sort_key).await
    }

    async fn fail(&self, partition: PartitionId, sort_key: u64) -> crate::Result<()> {
        self.ack(partition, sort_key).await
    }

    async fn reclaim_expired(
        &self,
        ttl: Duration,
        now: SystemTime,
    ) -> crate::Result<Vec<QueueEntry>> {
        let states: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut reclaimed = Vec::new();
        for state in states {
            let mut state = state.lock().await;
            let freed = state.reclaim(ttl, now);
            for entry in &freed {
                self.persist_entry(entry).await?;
            }
            reclaimed.extend(freed);
        }
        Ok(reclaimed)
    }

    async fn purge(&self, partition: PartitionId) -> crate::Result<usize> {
        let Some(state) = self.partitions.get(&partition).map(|state| Arc::clone(&state)) else {
            return Ok(0);
        };
        let mut state = state.lock().await;

        let removed = state.drain_unclaimed();
        for sort_key in &removed {
            self.remove_entry_file(partition, *sort_key).await?;
        }
        Ok(removed.len())
    }

    async fn purge_all(&self) -> crate::Result<usize> {
        let partitions: Vec<PartitionId> =
            self.partitions.iter().map(|entry| *entry.key()).collect();

        let mut removed = 0;
        for partition in partitions {
            removed += self.purge(partition).await?;
        }
        Ok(removed)
    }

    async fn backlog(&self, partition: PartitionId) -> crate::Result<usize> {
        match self.partitions.get(&partition).map(|state| Arc::clone(&state)) {
            Some(state) => Ok(state.lock().await.pending()),
            None => Ok(0),
        }
    }

    async fn partitions(&self) -> crate::Result<Vec<PartitionId>> {
        Ok(self.partitions.iter().map(|entry| *entry.key()).collect())
    }

    async fn len(&self) -> crate::Result<usize> {
        let states: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut total = 0;
        for state in states {
            total += state.lock().await.entries.len();
        }
        Ok(total)
    }
}

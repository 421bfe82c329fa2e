//! Append-only log of delivery attempts
//!
//! The log is the source of truth for the rate limiter's trailing
//! windows and for the paginated history collaborators read. Records
//! are appended in timestamp order, so the per-relay and per-campaign
//! indexes stay sorted and window counts are two binary searches.

use std::{
    sync::Arc,
    time::SystemTime,
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use volley_common::ids::{CampaignId, RecipientId, RelayId};

/// Outcome of one delivery attempt
///
/// Both variants consume rate-limit quota: a bounce still costs the
/// relay a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Sent,
    Failed,
}

/// One row of the attempt log
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub relay: RelayId,
    pub campaign: CampaignId,
    pub recipient: RecipientId,
    pub status: AttemptStatus,
    pub at: SystemTime,
}

/// One page of a paginated read
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
}

#[derive(Debug, Default)]
struct LogInner {
    records: Vec<Arc<AttemptRecord>>,
    /// Indexes into `records`, sorted by timestamp (append order)
    by_relay: AHashMap<RelayId, Vec<usize>>,
    by_campaign: AHashMap<CampaignId, Vec<usize>>,
}

/// Append-only attempt log with per-relay and per-campaign indexes
#[derive(Debug, Default)]
pub struct AttemptLog {
    inner: RwLock<LogInner>,
}

impl AttemptLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one attempt
    pub fn append(&self, record: AttemptRecord) {
        let mut inner = self.inner.write();
        let index = inner.records.len();
        inner.by_relay.entry(record.relay).or_default().push(index);
        inner
            .by_campaign
            .entry(record.campaign)
            .or_default()
            .push(index);
        inner.records.push(Arc::new(record));
    }

    /// Attempts logged for `relay` inside `[since, until]`
    ///
    /// Counts both successes and failures — relay quotas are spent per
    /// attempt, not per delivery.
    #[must_use]
    pub fn count_for_relay(&self, relay: RelayId, since: SystemTime, until: SystemTime) -> usize {
        let inner = self.inner.read();
        let Some(indexes) = inner.by_relay.get(&relay) else {
            return 0;
        };

        let start = indexes.partition_point(|&i| inner.records[i].at < since);
        let end = indexes.partition_point(|&i| inner.records[i].at <= until);
        end.saturating_sub(start)
    }

    /// Total attempts logged
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paginated read of a campaign's attempts, oldest first
    #[must_use]
    pub fn page_for_campaign(
        &self,
        campaign: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>> {
        let inner = self.inner.read();
        Self::page(
            inner.by_campaign.get(&campaign).map_or(&[][..], Vec::as_slice),
            &inner.records,
            offset,
            limit,
            None,
        )
    }

    /// Paginated read of a relay's attempts, oldest first, optionally
    /// restricted to a time range
    #[must_use]
    pub fn page_for_relay(
        &self,
        relay: RelayId,
        range: Option<(SystemTime, SystemTime)>,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>> {
        let inner = self.inner.read();
        Self::page(
            inner.by_relay.get(&relay).map_or(&[][..], Vec::as_slice),
            &inner.records,
            offset,
            limit,
            range,
        )
    }

    fn page(
        indexes: &[usize],
        records: &[Arc<AttemptRecord>],
        offset: usize,
        limit: usize,
        range: Option<(SystemTime, SystemTime)>,
    ) -> Page<Arc<AttemptRecord>> {
        let window = match range {
            Some((since, until)) => {
                let start = indexes.partition_point(|&i| records[i].at < since);
                let end = indexes.partition_point(|&i| records[i].at <= until);
                &indexes[start..end]
            }
            None => indexes,
        };

        let items = window
            .iter()
            .skip(offset)
            .take(limit)
            .map(|&i| records[i].clone())
            .collect();

        Page {
            items,
            total: window.len(),
            offset,
        }
    }
}

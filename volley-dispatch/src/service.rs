//! Service trait abstraction for dispatch queries and admin operations
//!
//! Control surfaces (sockets, HTTP handlers, CLIs) talk to this trait
//! rather than to the concrete processor, keeping them decoupled from
//! scheduler internals and trivially mockable.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use volley_common::{
    address::EmailAddress,
    campaign::Campaign,
    ids::{CampaignId, RelayId},
};
use volley_queue::PartitionId;

use crate::{
    attempt_log::{AttemptRecord, Page},
    bounce::BounceRecord,
    error::DispatchError,
    processor::DispatchProcessor,
    rate_limiter::TierUsage,
};

/// Read and admin surface exposed to collaborators
#[async_trait]
pub trait DispatchQueryService: Send + Sync {
    /// Status and advisory counters of a campaign
    fn campaign_status(&self, id: CampaignId) -> Option<Campaign>;

    /// Per-tier usage of a relay's rate limits
    fn relay_usage(&self, id: RelayId) -> Option<Vec<TierUsage>>;

    /// Paginated attempt history for a campaign, oldest first
    fn attempts_for_campaign(
        &self,
        id: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>>;

    /// Paginated attempt history for a relay, optionally time-bounded
    fn attempts_for_relay(
        &self,
        id: RelayId,
        range: Option<(SystemTime, SystemTime)>,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>>;

    /// Paginated bounce history for a campaign, oldest first
    fn bounces_for_campaign(
        &self,
        id: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<BounceRecord>>;

    /// Pending entries for a campaign's partition
    async fn queue_backlog(&self, id: CampaignId) -> usize;

    /// Quarantine a sender address for `duration`
    fn pause_sender(
        &self,
        relay: RelayId,
        address: EmailAddress,
        duration: Duration,
        reason: String,
    );

    /// Drop pending queue entries for one campaign, or for all
    ///
    /// # Errors
    /// Propagates queue store failures.
    async fn clear_queue(&self, campaign: Option<CampaignId>) -> Result<usize, DispatchError>;

    /// Cancel a campaign, purging its pending entries
    ///
    /// # Errors
    /// Returns a configuration error for unknown campaigns and
    /// propagates queue store failures.
    async fn cancel_campaign(&self, id: CampaignId) -> Result<bool, DispatchError>;
}

#[async_trait]
impl DispatchQueryService for DispatchProcessor {
    fn campaign_status(&self, id: CampaignId) -> Option<Campaign> {
        self.registry().campaign(id)
    }

    fn relay_usage(&self, id: RelayId) -> Option<Vec<TierUsage>> {
        self.registry().relay(id).map(|relay| {
            self.rate_limiter()
                .usage(&relay, SystemTime::now(), chrono::Utc::now())
        })
    }

    fn attempts_for_campaign(
        &self,
        id: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>> {
        self.attempts().page_for_campaign(id, offset, limit)
    }

    fn attempts_for_relay(
        &self,
        id: RelayId,
        range: Option<(SystemTime, SystemTime)>,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<AttemptRecord>> {
        self.attempts().page_for_relay(id, range, offset, limit)
    }

    fn bounces_for_campaign(
        &self,
        id: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<BounceRecord>> {
        self.bounces().page_for_campaign(id, offset, limit)
    }

    async fn queue_backlog(&self, id: CampaignId) -> usize {
        self.store()
            .backlog(PartitionId::new(id))
            .await
            .unwrap_or(0)
    }

    fn pause_sender(
        &self,
        relay: RelayId,
        address: EmailAddress,
        duration: Duration,
        reason: String,
    ) {
        Self::pause_sender(self, relay, address, duration, reason);
    }

    async fn clear_queue(&self, campaign: Option<CampaignId>) -> Result<usize, DispatchError> {
        Self::clear_queue(self, campaign).await
    }

    async fn cancel_campaign(&self, id: CampaignId) -> Result<bool, DispatchError> {
        self.registry()
            .cancel_campaign(self.store().as_ref(), id)
            .await
    }
}

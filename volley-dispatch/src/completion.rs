//! Campaign completion detection
//!
//! Runs after every terminal task transition: once the number of
//! terminal tasks reaches the campaign's recipient total, the campaign
//! is closed out and any residual queue entries for its partition are
//! purged. The purge is defensive — counters and queue can drift under
//! duplicate claims, the task table cannot.

use std::sync::Arc;

use tracing::info;
use volley_common::ids::CampaignId;
use volley_queue::{PartitionId, QueueStore};

use crate::{error::DispatchError, registry::Registry};

/// Detects and closes out finished campaigns
#[derive(Debug, Clone)]
pub struct CompletionMonitor {
    registry: Arc<Registry>,
    store: Arc<dyn QueueStore>,
}

impl CompletionMonitor {
    #[must_use]
    pub fn new(registry: Arc<Registry>, store: Arc<dyn QueueStore>) -> Self {
        Self { registry, store }
    }

    /// Check a campaign after one of its tasks went terminal
    ///
    /// Returns `true` when this call completed the campaign.
    ///
    /// # Errors
    /// Propagates queue errors from the residual purge.
    pub async fn on_terminal(&self, campaign: CampaignId) -> Result<bool, DispatchError> {
        let Some(snapshot) = self.registry.campaign(campaign) else {
            return Ok(false);
        };

        if snapshot.recipient_total == 0
            || self.registry.terminal_task_count(campaign) < snapshot.recipient_total
        {
            return Ok(false);
        }

        if !self.registry.complete_campaign(campaign) {
            // Already terminal (completed by a concurrent worker, or
            // cancelled); nothing left to do.
            return Ok(false);
        }

        let purged = self.store.purge(PartitionId::new(campaign)).await?;
        info!(
            campaign = %campaign,
            recipients = snapshot.recipient_total,
            purged,
            "Campaign completed"
        );

        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::{
        address::EmailAddress,
        campaign::CampaignStatus,
        ids::{RecipientId, RelayId},
        message::{MessagePayload, Substitutions},
        recipient::Recipient,
        relay::{RelayConfig, RelayLimits},
    };
    use volley_queue::MemoryQueueStore;

    use super::*;
    use crate::registry::TaskStatus;

    async fn campaign_with_recipients(
        registry: &Arc<Registry>,
        store: &Arc<MemoryQueueStore>,
        count: usize,
    ) -> CampaignId {
        registry.register_relay(RelayConfig {
            id: RelayId::generate(),
            name: "test".to_string(),
            active: true,
            senders: vec![EmailAddress::parse("a@example.com").unwrap()],
            limits: RelayLimits::default(),
        });

        let recipients = (0..count)
            .map(|i| {
                (
                    Recipient::new(
                        RecipientId::generate(),
                        EmailAddress::parse(&format!("user{i}@example.org")).unwrap(),
                    ),
                    Substitutions::default(),
                )
            })
            .collect();

        registry
            .enqueue_campaign(store.as_ref(), "test", None, MessagePayload::default(), recipients)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_completes_only_at_recipient_total() {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(MemoryQueueStore::new());
        let campaign = campaign_with_recipients(&registry, &store, 3).await;

        let monitor = CompletionMonitor::new(registry.clone(), store.clone());
        let partition = PartitionId::new(campaign);

        // Resolve tasks one by one; completion fires exactly at the end
        for expected_done in [false, false, true] {
            let entry = store.claim(partition).await.unwrap().unwrap();
            let status = if expected_done {
                // Any sent/failed split completes; make the last a failure
                TaskStatus::Failed
            } else {
                TaskStatus::Sent
            };
            registry.mark_task_terminal(entry.task, status, None);
            store.ack(partition, entry.sort_key).await.unwrap();

            let completed = monitor.on_terminal(campaign).await.unwrap();
            assert_eq!(completed, expected_done);
        }

        let snapshot = registry.campaign(campaign).unwrap();
        assert_eq!(snapshot.status, CampaignStatus::Sent);
        assert_eq!(store.backlog(partition).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_completion_purges_residual_entries() {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(MemoryQueueStore::new());
        let campaign = campaign_with_recipients(&registry, &store, 2).await;

        let monitor = CompletionMonitor::new(registry.clone(), store.clone());
        let partition = PartitionId::new(campaign);

        // Resolve both tasks but leave their entries queued (drift)
        for _ in 0..2 {
            let entry = store.claim(partition).await.unwrap().unwrap();
            registry.mark_task_terminal(entry.task, TaskStatus::Sent, None);
            store.release(partition, entry.sort_key).await.unwrap();
        }
        assert_eq!(store.backlog(partition).await.unwrap(), 2);

        assert!(monitor.on_terminal(campaign).await.unwrap());
        assert_eq!(store.backlog(partition).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_campaign_never_flips_to_sent() {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(MemoryQueueStore::new());
        let campaign = campaign_with_recipients(&registry, &store, 1).await;
        let partition = PartitionId::new(campaign);

        // The single task is claimed when cancellation lands
        let entry = store.claim(partition).await.unwrap().unwrap();
        registry
            .cancel_campaign(store.as_ref(), campaign)
            .await
            .unwrap();

        // The in-flight task still runs to completion
        registry.mark_task_terminal(entry.task, TaskStatus::Sent, None);
        store.ack(partition, entry.sort_key).await.unwrap();

        let monitor = CompletionMonitor::new(registry.clone(), store.clone());
        assert!(!monitor.on_terminal(campaign).await.unwrap());

        // Cancelled is terminal; completion must not overwrite it
        assert_eq!(
            registry.campaign(campaign).unwrap().status,
            CampaignStatus::Cancelled
        );
    }
}

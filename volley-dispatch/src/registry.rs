//! Shared dispatch state: campaigns, recipients, tasks, relays
//!
//! The registry is the dispatcher's view of the data collaborators feed
//! in. Delivery tasks are owned here outright: the unique
//! `(campaign, recipient)` key plus the first-terminal-transition guard
//! are what make delivery at-most-one-success-per-recipient.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use volley_common::{
    campaign::{Campaign, CampaignStatus},
    ids::{CampaignId, RecipientId, RelayId, TaskKey},
    message::{MessagePayload, Substitutions},
    recipient::Recipient,
    relay::RelayConfig,
};
use volley_queue::{PartitionId, QueueStore};

use crate::{
    error::{ConfigurationError, DispatchError},
    relay_state::RelayHandle,
};

/// Status of one delivery task; `Sent` and `Failed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Sent,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One per-recipient delivery task, owned by the dispatcher
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub key: TaskKey,
    pub status: TaskStatus,
    pub substitutions: Substitutions,
    /// Diagnostic of the failing attempt, when failed
    pub diagnostic: Option<String>,
}

#[derive(Debug)]
struct CampaignState {
    campaign: Mutex<Campaign>,
    payload: Arc<MessagePayload>,
    /// Exact count of tasks that reached a terminal state; incremented
    /// only under the task's first-transition guard, so it equals what
    /// a scan of the task table would find.
    terminal: AtomicU64,
}

/// In-memory registry of dispatch state
#[derive(Debug, Default)]
pub struct Registry {
    campaigns: DashMap<CampaignId, Arc<CampaignState>>,
    recipients: DashMap<RecipientId, Mutex<Recipient>>,
    tasks: DashMap<TaskKey, Mutex<DeliveryTask>>,
    relays: DashMap<RelayId, Arc<RelayHandle>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outbound relay
    pub fn register_relay(&self, config: RelayConfig) -> Arc<RelayHandle> {
        let handle = Arc::new(RelayHandle::new(config));
        self.relays.insert(handle.config.id, handle.clone());
        handle
    }

    /// Look up a relay by id
    #[must_use]
    pub fn relay(&self, id: RelayId) -> Option<Arc<RelayHandle>> {
        self.relays.get(&id).map(|handle| Arc::clone(&handle))
    }

    /// All registered relays
    #[must_use]
    pub fn relays(&self) -> Vec<Arc<RelayHandle>> {
        self.relays.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Distribute a campaign: create its tasks and queue entries
    ///
    /// Only recipients whose reachability allows delivery get a task;
    /// `recipient_total` counts the tasks actually created, so
    /// completion is unaffected by skipped recipients. The campaign
    /// starts in `Sending`.
    ///
    /// # Errors
    /// Returns a configuration error if no usable relay is available,
    /// or a queue error if enqueueing fails.
    pub async fn enqueue_campaign(
        &self,
        store: &dyn QueueStore,
        name: impl Into<String> + Send,
        relay: Option<RelayId>,
        payload: MessagePayload,
        recipients: Vec<(Recipient, Substitutions)>,
    ) -> Result<CampaignId, DispatchError> {
        let relay = match relay {
            Some(id) => {
                if self.relays.contains_key(&id) {
                    id
                } else {
                    return Err(ConfigurationError::RelayNotFound(id).into());
                }
            }
            None => self
                .relays
                .iter()
                .find(|entry| entry.value().config.active)
                .map(|entry| *entry.key())
                .ok_or(ConfigurationError::NoActiveRelay)?,
        };

        let campaign_id = CampaignId::generate();
        let partition = PartitionId::new(campaign_id);
        let mut created = 0u64;

        for (recipient, substitutions) in recipients {
            if !recipient.reachability.is_deliverable() {
                debug!(
                    recipient = %recipient.id,
                    reachability = ?recipient.reachability,
                    "Skipping undeliverable recipient at distribution"
                );
                continue;
            }

            let key = TaskKey::new(campaign_id, recipient.id);
            self.recipients
                .entry(recipient.id)
                .or_insert_with(|| Mutex::new(recipient));

            // (campaign, recipient) is unique: a duplicate in the input
            // list must not produce a second task
            if self.tasks.contains_key(&key) {
                continue;
            }

            self.tasks.insert(
                key,
                Mutex::new(DeliveryTask {
                    key,
                    status: TaskStatus::Pending,
                    substitutions,
                    diagnostic: None,
                }),
            );

            store.enqueue(partition, key).await?;
            created += 1;
        }

        let mut campaign = Campaign::new(campaign_id, name, relay);
        campaign.status = CampaignStatus::Sending;
        campaign.recipient_total = created;

        self.campaigns.insert(
            campaign_id,
            Arc::new(CampaignState {
                campaign: Mutex::new(campaign),
                payload: Arc::new(payload),
                terminal: AtomicU64::new(0),
            }),
        );

        info!(
            campaign = %campaign_id,
            relay = %relay,
            recipients = created,
            "Campaign distributed"
        );

        Ok(campaign_id)
    }

    /// Snapshot of a campaign's current state
    #[must_use]
    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns
            .get(&id)
            .map(|state| state.campaign.lock().clone())
    }

    /// All campaign ids currently registered
    #[must_use]
    pub fn campaign_ids(&self) -> Vec<CampaignId> {
        self.campaigns.iter().map(|entry| *entry.key()).collect()
    }

    /// The rendered payload shared by a campaign's tasks
    #[must_use]
    pub fn payload(&self, id: CampaignId) -> Option<Arc<MessagePayload>> {
        self.campaigns.get(&id).map(|state| state.payload.clone())
    }

    /// Cancel a campaign and purge its pending queue entries
    ///
    /// Cancellation is non-preemptive: entries already claimed keep
    /// running and resolve normally. Returns `false` when the campaign
    /// was already terminal.
    ///
    /// # Errors
    /// Propagates queue errors from the purge.
    pub async fn cancel_campaign(
        &self,
        store: &dyn QueueStore,
        id: CampaignId,
    ) -> Result<bool, DispatchError> {
        let Some(state) = self.campaigns.get(&id).map(|state| Arc::clone(&state)) else {
            return Err(ConfigurationError::CampaignNotFound(id).into());
        };

        {
            let mut campaign = state.campaign.lock();
            if !campaign.status.is_cancellable() {
                return Ok(false);
            }
            campaign.status = CampaignStatus::Cancelled;
        }

        let purged = store.purge(PartitionId::new(id)).await?;
        info!(campaign = %id, purged, "Campaign cancelled");
        Ok(true)
    }

    /// Pause dispatch for a campaign
    pub fn pause_campaign(&self, id: CampaignId) -> bool {
        self.transition_campaign(id, CampaignStatus::Sending, CampaignStatus::Paused)
    }

    /// Resume a paused campaign
    pub fn resume_campaign(&self, id: CampaignId) -> bool {
        self.transition_campaign(id, CampaignStatus::Paused, CampaignStatus::Sending)
    }

    fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> bool {
        self.campaigns.get(&id).is_some_and(|state| {
            let mut campaign = state.campaign.lock();
            if campaign.status == from {
                campaign.status = to;
                true
            } else {
                false
            }
        })
    }

    /// Mark a campaign `Sent` unless it already reached a terminal state
    pub fn complete_campaign(&self, id: CampaignId) -> bool {
        self.campaigns.get(&id).is_some_and(|state| {
            let mut campaign = state.campaign.lock();
            if campaign.status.is_terminal() {
                false
            } else {
                campaign.status = CampaignStatus::Sent;
                true
            }
        })
    }

    /// Whether workers should pull from this campaign's partition
    #[must_use]
    pub fn is_dispatchable(&self, id: CampaignId) -> bool {
        self.campaigns.get(&id).is_some_and(|state| {
            state.campaign.lock().status.is_dispatchable()
        })
    }

    /// Current status of a task
    #[must_use]
    pub fn task_status(&self, key: TaskKey) -> Option<TaskStatus> {
        self.tasks.get(&key).map(|task| task.lock().status)
    }

    /// Snapshot of a task
    #[must_use]
    pub fn task(&self, key: TaskKey) -> Option<DeliveryTask> {
        self.tasks.get(&key).map(|task| task.lock().clone())
    }

    /// Move a task into a terminal state
    ///
    /// Returns `true` only on the first transition; a task already
    /// terminal is left untouched. This is the double-count guard: the
    /// caller must only bump advisory counters when this returns
    /// `true`.
    pub fn mark_task_terminal(
        &self,
        key: TaskKey,
        status: TaskStatus,
        diagnostic: Option<String>,
    ) -> bool {
        debug_assert!(status.is_terminal());

        let Some(task) = self.tasks.get(&key) else {
            return false;
        };

        let first = {
            let mut task = task.lock();
            if task.status.is_terminal() {
                false
            } else {
                task.status = status;
                task.diagnostic = diagnostic;
                true
            }
        };

        if first
            && let Some(state) = self.campaigns.get(&key.campaign)
        {
            state.terminal.fetch_add(1, Ordering::SeqCst);
        }

        first
    }

    /// Exact count of terminal tasks for a campaign
    #[must_use]
    pub fn terminal_task_count(&self, id: CampaignId) -> u64 {
        self.campaigns
            .get(&id)
            .map_or(0, |state| state.terminal.load(Ordering::SeqCst))
    }

    /// Count terminal tasks by scanning the task table
    ///
    /// Slower than [`Self::terminal_task_count`] but independent of the
    /// maintained counter; used by tests and consistency checks.
    #[must_use]
    pub fn scan_terminal_tasks(&self, id: CampaignId) -> u64 {
        let count = self
            .tasks
            .iter()
            .filter(|entry| entry.key().campaign == id && entry.value().lock().status.is_terminal())
            .count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    /// Bump the advisory attempted/delivered counters
    pub fn record_attempted(&self, id: CampaignId, delivered: bool) {
        if let Some(state) = self.campaigns.get(&id) {
            let mut campaign = state.campaign.lock();
            campaign.counters.attempted += 1;
            if delivered {
                campaign.counters.delivered += 1;
            }
        }
    }

    /// Bump the advisory bounced counter
    pub fn record_bounced(&self, id: CampaignId) {
        if let Some(state) = self.campaigns.get(&id) {
            state.campaign.lock().counters.bounced += 1;
        }
    }

    /// Snapshot of a recipient
    #[must_use]
    pub fn recipient(&self, id: RecipientId) -> Option<Recipient> {
        self.recipients.get(&id).map(|r| r.lock().clone())
    }

    /// Run `f` with exclusive access to a recipient
    pub fn with_recipient_mut<T>(
        &self,
        id: RecipientId,
        f: impl FnOnce(&mut Recipient) -> T,
    ) -> Option<T> {
        self.recipients.get(&id).map(|r| f(&mut r.lock()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::{address::EmailAddress, recipient::Reachability, relay::RelayLimits};
    use volley_queue::MemoryQueueStore;

    use super::*;

    fn relay_config() -> RelayConfig {
        RelayConfig {
            id: RelayId::generate(),
            name: "test".to_string(),
            active: true,
            senders: vec![EmailAddress::parse("a@example.com").unwrap()],
            limits: RelayLimits::default(),
        }
    }

    fn recipient(raw: &str) -> Recipient {
        Recipient::new(RecipientId::generate(), EmailAddress::parse(raw).unwrap())
    }

    #[tokio::test]
    async fn test_distribution_creates_tasks_and_entries() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();
        let relay = registry.register_relay(relay_config());

        let recipients = vec![
            (recipient("a@example.org"), Substitutions::default()),
            (recipient("b@example.org"), Substitutions::default()),
        ];

        let campaign = registry
            .enqueue_campaign(
                &store,
                "launch",
                Some(relay.config.id),
                MessagePayload::default(),
                recipients,
            )
            .await
            .unwrap();

        let snapshot = registry.campaign(campaign).unwrap();
        assert_eq!(snapshot.status, CampaignStatus::Sending);
        assert_eq!(snapshot.recipient_total, 2);
        assert_eq!(
            store.backlog(PartitionId::new(campaign)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_distribution_skips_undeliverable_recipients() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();
        registry.register_relay(relay_config());

        let mut bounced = recipient("gone@example.org");
        bounced.reachability = Reachability::Bounced;

        let campaign = registry
            .enqueue_campaign(
                &store,
                "launch",
                None,
                MessagePayload::default(),
                vec![
                    (recipient("ok@example.org"), Substitutions::default()),
                    (bounced, Substitutions::default()),
                ],
            )
            .await
            .unwrap();

        assert_eq!(registry.campaign(campaign).unwrap().recipient_total, 1);
    }

    #[tokio::test]
    async fn test_distribution_requires_a_relay() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();

        let result = registry
            .enqueue_campaign(
                &store,
                "launch",
                None,
                MessagePayload::default(),
                vec![(recipient("a@example.org"), Substitutions::default())],
            )
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Configuration(
                ConfigurationError::NoActiveRelay
            ))
        ));
    }

    #[tokio::test]
    async fn test_first_terminal_transition_wins_once() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();
        registry.register_relay(relay_config());

        let campaign = registry
            .enqueue_campaign(
                &store,
                "launch",
                None,
                MessagePayload::default(),
                vec![(recipient("a@example.org"), Substitutions::default())],
            )
            .await
            .unwrap();

        let key = {
            let entry = store.claim(PartitionId::new(campaign)).await.unwrap().unwrap();
            entry.task
        };

        assert!(registry.mark_task_terminal(key, TaskStatus::Sent, None));
        // Redelivery of the same task must not transition again
        assert!(!registry.mark_task_terminal(key, TaskStatus::Sent, None));
        assert!(!registry.mark_task_terminal(
            key,
            TaskStatus::Failed,
            Some("late failure".to_string())
        ));

        assert_eq!(registry.terminal_task_count(campaign), 1);
        assert_eq!(registry.scan_terminal_tasks(campaign), 1);
        assert_eq!(registry.task_status(key), Some(TaskStatus::Sent));
    }

    #[tokio::test]
    async fn test_cancel_purges_pending_entries() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();
        registry.register_relay(relay_config());

        let campaign = registry
            .enqueue_campaign(
                &store,
                "launch",
                None,
                MessagePayload::default(),
                vec![
                    (recipient("a@example.org"), Substitutions::default()),
                    (recipient("b@example.org"), Substitutions::default()),
                ],
            )
            .await
            .unwrap();

        // One task is mid-flight at cancellation time
        let claimed = store
            .claim(PartitionId::new(campaign))
            .await
            .unwrap()
            .unwrap();

        assert!(registry.cancel_campaign(&store, campaign).await.unwrap());
        assert_eq!(
            registry.campaign(campaign).unwrap().status,
            CampaignStatus::Cancelled
        );

        // The claimed entry survives; the pending one is gone
        assert_eq!(store.backlog(PartitionId::new(campaign)).await.unwrap(), 0);
        store
            .ack(PartitionId::new(campaign), claimed.sort_key)
            .await
            .unwrap();

        // Cancelling twice is a no-op
        assert!(!registry.cancel_campaign(&store, campaign).await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let registry = Registry::new();
        let store = MemoryQueueStore::new();
        registry.register_relay(relay_config());

        let campaign = registry
            .enqueue_campaign(
                &store,
                "launch",
                None,
                MessagePayload::default(),
                vec![(recipient("a@example.org"), Substitutions::default())],
            )
            .await
            .unwrap();

        assert!(registry.is_dispatchable(campaign));
        assert!(registry.pause_campaign(campaign));
        assert!(!registry.is_dispatchable(campaign));
        assert!(registry.resume_campaign(campaign));
        assert!(registry.is_dispatchable(campaign));
    }
}

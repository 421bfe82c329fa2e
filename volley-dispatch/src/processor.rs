//! Worker pool orchestration
//!
//! Workers are independent: each runs the same claim → rate-check →
//! send → record loop against the shared queue store, with no central
//! coordinator handing out work. Coordination happens entirely through
//! the store's claim protocol and the relay's atomic counters, so any
//! worker can die without taking scheduling state with it.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, error, info, warn};
use volley_common::Signal;
use volley_queue::{ClaimReaper, ClaimSettings, QueueEntry, QueueStore};

use crate::{
    attempt_log::AttemptLog,
    bounce::BounceClassifier,
    completion::CompletionMonitor,
    error::DispatchError,
    executor::{AttemptOutcome, DeliveryExecutor},
    fairness::{FairnessConfig, FairnessPolicy},
    rate_limiter::RateLimiter,
    registry::Registry,
    rotator::SenderRotator,
    transport::Transport,
};

fn default_worker_count() -> usize {
    num_cpus::get()
}

const fn default_poll_interval() -> u64 {
    1
}

const fn default_defer_cap() -> u64 {
    60
}

/// Configuration for the dispatch processor
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Number of concurrent dispatch workers
    ///
    /// Default: one per CPU
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long an idle worker sleeps before looking again (in seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single deferral sleep (in seconds)
    ///
    /// A day-tier block suggests waiting a day; capping keeps workers
    /// responsive to shutdown and to limits freeing up early.
    #[serde(default = "default_defer_cap")]
    pub defer_cap_secs: u64,

    /// Claim lease parameters shared with the reaper
    #[serde(default)]
    pub claim: ClaimSettings,

    /// Cross-partition interleaving policy
    #[serde(default)]
    pub fairness: FairnessConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_secs: default_poll_interval(),
            defer_cap_secs: default_defer_cap(),
            claim: ClaimSettings::default(),
            fairness: FairnessConfig::default(),
        }
    }
}

impl ProcessorConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn defer_cap(&self) -> Duration {
        Duration::from_secs(self.defer_cap_secs)
    }
}

/// Everything one worker iteration needs, cheaply cloneable
#[derive(Clone)]
struct WorkerContext {
    store: Arc<dyn QueueStore>,
    registry: Arc<Registry>,
    executor: Arc<DeliveryExecutor>,
    fairness: Arc<dyn FairnessPolicy>,
    poll_interval: Duration,
    defer_cap: Duration,
}

impl WorkerContext {
    /// One claim/execute/resolve pass; returns how long to sleep before
    /// the next one
    async fn work_once(&self, worker: usize) -> Duration {
        let partitions = match self.store.partitions().await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(worker, error = %e, "Failed to list partitions");
                return self.poll_interval;
            }
        };

        let mut backlogs = Vec::with_capacity(partitions.len());
        for partition in partitions {
            if !self.registry.is_dispatchable(partition.campaign()) {
                continue;
            }
            match self.store.backlog(partition).await {
                Ok(backlog) => backlogs.push((partition, backlog)),
                Err(e) => warn!(worker, partition = %partition, error = %e, "Failed to read backlog"),
            }
        }

        let Some(partition) = self.fairness.next_partition(&backlogs) else {
            // Nothing claimable anywhere: suspend, don't spin
            return self.poll_interval;
        };

        match self.store.claim(partition).await {
            Ok(Some(entry)) => self.handle_entry(worker, entry).await,
            Ok(None) => {
                // Raced another worker for the last entry; look again
                Duration::ZERO
            }
            Err(e) => {
                warn!(worker, partition = %partition, error = %e, "Claim failed");
                self.poll_interval
            }
        }
    }

    async fn handle_entry(&self, worker: usize, entry: QueueEntry) -> Duration {
        let partition = entry.partition;
        let sort_key = entry.sort_key;

        match self.executor.execute(&entry).await {
            Ok(AttemptOutcome::Sent | AttemptOutcome::Skipped) => {
                self.resolve(partition, sort_key, true).await;
                Duration::ZERO
            }
            Ok(AttemptOutcome::Failed(_)) => {
                self.resolve(partition, sort_key, false).await;
                Duration::ZERO
            }
            Ok(AttemptOutcome::Deferred(wait)) => {
                // Not a state transition: the task stays pending and
                // the worker backs off
                if let Err(e) = self.store.release(partition, sort_key).await {
                    warn!(worker, partition = %partition, sort_key, error = %e, "Release failed");
                }
                wait.min(self.defer_cap)
            }
            Err(e) if e.is_alert() => {
                // The executor already failed the task; all that is
                // left is the operator-visible alert and resolution
                error!(worker, partition = %partition, sort_key, error = %e, "Operator alert");
                self.resolve(partition, sort_key, false).await;
                Duration::ZERO
            }
            Err(e) => {
                warn!(worker, partition = %partition, sort_key, error = %e, "Attempt errored, leaving task pending");
                if let Err(release_err) = self.store.release(partition, sort_key).await {
                    warn!(worker, partition = %partition, sort_key, error = %release_err, "Release failed");
                }
                self.poll_interval
            }
        }
    }

    async fn resolve(&self, partition: volley_queue::PartitionId, sort_key: u64, success: bool) {
        let result = if success {
            self.store.ack(partition, sort_key).await
        } else {
            self.store.fail(partition, sort_key).await
        };
        if let Err(e) = result {
            warn!(partition = %partition, sort_key, error = %e, "Failed to resolve queue entry");
        }
    }
}

/// The dispatch scheduler: worker pool plus claim reaper
#[derive(Debug)]
pub struct DispatchProcessor {
    config: ProcessorConfig,
    registry: Arc<Registry>,
    store: Arc<dyn QueueStore>,
    executor: Arc<DeliveryExecutor>,
    fairness: Arc<dyn FairnessPolicy>,
    rotator: Arc<SenderRotator>,
    attempts: Arc<AttemptLog>,
    bounces: Arc<BounceClassifier>,
    limiter: RateLimiter,
}

impl DispatchProcessor {
    /// Wire the scheduler together
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        registry: Arc<Registry>,
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let attempts = Arc::new(AttemptLog::new());
        let rotator = Arc::new(SenderRotator::new());
        let bounces = Arc::new(BounceClassifier::new());
        let limiter = RateLimiter::new(attempts.clone(), rotator.clone());
        let completion = CompletionMonitor::new(registry.clone(), store.clone());
        let fairness: Arc<dyn FairnessPolicy> = Arc::from(config.fairness.build());

        let executor = Arc::new(DeliveryExecutor::new(
            registry.clone(),
            limiter.clone(),
            rotator.clone(),
            attempts.clone(),
            bounces.clone(),
            transport,
            completion,
        ));

        Self {
            config,
            registry,
            store,
            executor,
            fairness,
            rotator,
            attempts,
            bounces,
            limiter,
        }
    }

    /// Run workers and reaper until a shutdown signal arrives
    ///
    /// Each worker finishes its in-flight attempt before exiting;
    /// anything still claimed when the process dies is returned to the
    /// pool by the next reaper pass.
    pub async fn serve(&self, shutdown: Receiver<Signal>) {
        info!(
            workers = self.config.worker_count,
            poll_secs = self.config.poll_interval_secs,
            "Dispatch processor starting"
        );

        let reaper = ClaimReaper::new(self.store.clone(), self.config.claim);
        let reaper_shutdown = shutdown.resubscribe();
        let mut handles = vec![tokio::spawn(reaper.serve(reaper_shutdown))];

        let context = WorkerContext {
            store: self.store.clone(),
            registry: self.registry.clone(),
            executor: self.executor.clone(),
            fairness: self.fairness.clone(),
            poll_interval: self.config.poll_interval(),
            defer_cap: self.config.defer_cap(),
        };

        for worker in 0..self.config.worker_count.max(1) {
            let context = context.clone();
            let worker_shutdown = shutdown.resubscribe();
            handles.push(tokio::spawn(worker_loop(worker, context, worker_shutdown)));
        }
        drop(shutdown);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Dispatch task panicked: {e}");
            }
        }

        info!("Dispatch processor stopped");
    }

    /// Quarantine one of a relay's sender addresses
    pub fn pause_sender(
        &self,
        relay: volley_common::ids::RelayId,
        address: volley_common::address::EmailAddress,
        duration: Duration,
        reason: impl Into<String>,
    ) {
        self.rotator.pause(relay, address, duration, reason);
    }

    /// Remove pending entries for one campaign, or all of them
    ///
    /// # Errors
    /// Propagates queue errors.
    pub async fn clear_queue(
        &self,
        campaign: Option<volley_common::ids::CampaignId>,
    ) -> Result<usize, DispatchError> {
        let removed = match campaign {
            Some(id) => self.store.purge(volley_queue::PartitionId::new(id)).await?,
            None => self.store.purge_all().await?,
        };
        debug!(removed, "Cleared queue entries");
        Ok(removed)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    #[must_use]
    pub fn attempts(&self) -> &Arc<AttemptLog> {
        &self.attempts
    }

    #[must_use]
    pub fn bounces(&self) -> &Arc<BounceClassifier> {
        &self.bounces
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn rotator(&self) -> &Arc<SenderRotator> {
        &self.rotator
    }
}

async fn worker_loop(worker: usize, context: WorkerContext, mut shutdown: Receiver<Signal>) {
    debug!(worker, "Dispatch worker started");
    let mut wait = Duration::ZERO;

    loop {
        tokio::select! {
            sig = shutdown.recv() => {
                match sig {
                    Ok(Signal::Shutdown | Signal::Finalised) => {
                        debug!(worker, "Dispatch worker received shutdown signal");
                    }
                    Err(e) => {
                        error!(worker, "Dispatch worker shutdown channel error: {e}");
                    }
                }
                break;
            }
            () = tokio::time::sleep(wait) => {
                // The whole claim/execute/resolve pass runs inside this
                // arm, so shutdown never interrupts an attempt halfway.
                wait = context.work_once(worker).await;
            }
        }
    }

    debug!(worker, "Dispatch worker stopped");
}

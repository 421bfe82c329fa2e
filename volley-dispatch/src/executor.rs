//! Single-attempt delivery state machine
//!
//! A task moves `Pending → {Sent, Failed}` and never again. Everything
//! else the executor can report is *not* a transition:
//!
//! - a rate-limit block defers the task (backpressure, not failure);
//! - a task found already terminal is skipped (the idempotency guard
//!   that makes duplicate claims harmless).
//!
//! The worker reads the outcome and resolves the queue entry; the
//! executor never touches claims.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, error, info};
use volley_common::{
    campaign::CampaignStatus,
    ids::TaskKey,
    message::MessagePayload,
};
use volley_queue::QueueEntry;

use crate::{
    attempt_log::{AttemptLog, AttemptRecord, AttemptStatus},
    bounce::BounceClassifier,
    completion::CompletionMonitor,
    error::{ConfigurationError, DispatchError},
    rate_limiter::RateLimiter,
    registry::{Registry, TaskStatus},
    relay_state::RelayHandle,
    rotator::SenderRotator,
    transport::{Envelope, Transport},
};

/// How long to defer when blocked for a reason without its own wait
/// hint (paused campaign, inactive relay, quarantined sender)
const DEFAULT_DEFERRAL: Duration = Duration::from_secs(30);

/// Result of executing one claimed queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Delivered; the task reached `Sent`.
    Sent,

    /// The transport failed the attempt; the task reached `Failed`
    /// with this diagnostic.
    Failed(String),

    /// Admission denied; the task stays `Pending` and the worker
    /// should back off for roughly this long.
    Deferred(Duration),

    /// The task was already terminal when re-read; nothing was logged
    /// and no counter moved.
    Skipped,
}

/// Executes one delivery attempt end to end
#[derive(Debug)]
pub struct DeliveryExecutor {
    registry: Arc<Registry>,
    limiter: RateLimiter,
    rotator: Arc<SenderRotator>,
    attempts: Arc<AttemptLog>,
    bounces: Arc<BounceClassifier>,
    transport: Arc<dyn Transport>,
    completion: CompletionMonitor,
}

impl DeliveryExecutor {
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Wired once by the processor")]
    pub fn new(
        registry: Arc<Registry>,
        limiter: RateLimiter,
        rotator: Arc<SenderRotator>,
        attempts: Arc<AttemptLog>,
        bounces: Arc<BounceClassifier>,
        transport: Arc<dyn Transport>,
        completion: CompletionMonitor,
    ) -> Self {
        Self {
            registry,
            limiter,
            rotator,
            attempts,
            bounces,
            transport,
            completion,
        }
    }

    /// Execute one claimed entry
    ///
    /// # Errors
    /// Returns [`DispatchError::Configuration`] when the attempt hit a
    /// misconfiguration; the task has already been terminally failed
    /// and logged by the time the error surfaces, so the caller only
    /// needs to alert and resolve the entry.
    pub async fn execute(&self, entry: &QueueEntry) -> Result<AttemptOutcome, DispatchError> {
        let key = entry.task;

        // Idempotency guard: duplicate claims re-read the persisted
        // status and bail before any bookkeeping.
        match self.registry.task_status(key) {
            Some(status) if status.is_terminal() => {
                debug!(task = %key, ?status, "Task already terminal, skipping");
                return Ok(AttemptOutcome::Skipped);
            }
            Some(_) => {}
            None => {
                debug!(task = %key, "Task unknown to the registry, skipping");
                return Ok(AttemptOutcome::Skipped);
            }
        }

        let Some(campaign) = self.registry.campaign(key.campaign) else {
            return self
                .fail_on_configuration(key, ConfigurationError::CampaignNotFound(key.campaign))
                .await;
        };

        // Cancellation is non-preemptive: an entry claimed before the
        // cancel still runs. Anything else that is not `Sending` waits.
        if !campaign.status.is_dispatchable() && campaign.status != CampaignStatus::Cancelled {
            return Ok(AttemptOutcome::Deferred(DEFAULT_DEFERRAL));
        }

        let Some(relay) = self.registry.relay(campaign.relay) else {
            return self
                .fail_on_configuration(key, ConfigurationError::RelayNotFound(campaign.relay))
                .await;
        };

        // Relay-level admission first; this is the backpressure path.
        let admission = self.limiter.check(&relay, None);
        if !admission.allowed {
            debug!(
                task = %key,
                relay = %relay.config.id,
                blocking_tier = ?admission.blocking_tier,
                "Rate limited, deferring"
            );
            return Ok(AttemptOutcome::Deferred(
                admission.suggested_wait.unwrap_or(DEFAULT_DEFERRAL),
            ));
        }

        let sender = match self.rotator.next_sender(&relay) {
            Ok(sender) => sender,
            Err(e) => return self.fail_on_configuration(key, e).await,
        };

        // The rotated address may be quarantined; that blocks this
        // attempt the same way a saturated tier does.
        let targeted = self.limiter.check(&relay, Some(&sender));
        if !targeted.allowed {
            return Ok(AttemptOutcome::Deferred(
                targeted.suggested_wait.unwrap_or(DEFAULT_DEFERRAL),
            ));
        }

        let Some(payload) = self.registry.payload(key.campaign) else {
            return self
                .fail_on_configuration(key, ConfigurationError::PayloadMissing(key.campaign))
                .await;
        };
        let Some(task) = self.registry.task(key) else {
            return Ok(AttemptOutcome::Skipped);
        };
        let Some(recipient) = self.registry.recipient(key.recipient) else {
            return Ok(AttemptOutcome::Skipped);
        };

        let envelope = build_envelope(&payload, &task.substitutions, key, &sender, &recipient.email);

        match self.transport.send(&relay.config, &envelope).await {
            Ok(()) => {
                self.finalize(key, &relay, TaskStatus::Sent, None).await?;
                Ok(AttemptOutcome::Sent)
            }
            Err(e) => {
                let diagnostic = e.diagnostic();
                self.finalize(key, &relay, TaskStatus::Failed, Some(diagnostic.clone()))
                    .await?;
                Ok(AttemptOutcome::Failed(diagnostic))
            }
        }
    }

    /// Shared bookkeeping for both terminal outcomes
    ///
    /// Order matters: the first-transition guard decides counters, the
    /// day counter and attempt log record the attempt either way, and
    /// the completion check runs last.
    async fn finalize(
        &self,
        key: TaskKey,
        relay: &RelayHandle,
        status: TaskStatus,
        diagnostic: Option<String>,
    ) -> Result<(), DispatchError> {
        let now = SystemTime::now();
        let first = self
            .registry
            .mark_task_terminal(key, status, diagnostic.clone());

        if first {
            self.registry
                .record_attempted(key.campaign, status == TaskStatus::Sent);

            if status == TaskStatus::Failed
                && let Some(diagnostic) = &diagnostic
            {
                self.registry.with_recipient_mut(key.recipient, |recipient| {
                    self.bounces
                        .record_failure(key.campaign, recipient, diagnostic, now);
                });
                self.registry.record_bounced(key.campaign);
            }
        }

        // Every attempt spends relay quota, success or bounce alike.
        relay.charge_day(chrono::Utc::now());
        self.attempts.append(AttemptRecord {
            relay: relay.config.id,
            campaign: key.campaign,
            recipient: key.recipient,
            status: match status {
                TaskStatus::Sent => AttemptStatus::Sent,
                TaskStatus::Failed | TaskStatus::Pending => AttemptStatus::Failed,
            },
            at: now,
        });

        match status {
            TaskStatus::Sent => info!(task = %key, relay = %relay.config.id, "Delivered"),
            _ => info!(
                task = %key,
                relay = %relay.config.id,
                diagnostic = diagnostic.as_deref().unwrap_or(""),
                "Delivery failed"
            ),
        }

        self.completion.on_terminal(key.campaign).await?;
        Ok(())
    }

    /// Terminal failure for misconfiguration: no bounce classification,
    /// but the task is failed, logged, and the error alerts upward
    async fn fail_on_configuration(
        &self,
        key: TaskKey,
        error: ConfigurationError,
    ) -> Result<AttemptOutcome, DispatchError> {
        error!(task = %key, error = %error, "Configuration error during delivery");

        let first = self
            .registry
            .mark_task_terminal(key, TaskStatus::Failed, Some(error.to_string()));
        if first {
            self.registry.record_attempted(key.campaign, false);
        }
        self.completion.on_terminal(key.campaign).await?;

        Err(error.into())
    }
}

fn build_envelope(
    payload: &MessagePayload,
    substitutions: &volley_common::message::Substitutions,
    key: TaskKey,
    sender: &volley_common::address::EmailAddress,
    recipient: &volley_common::address::EmailAddress,
) -> Envelope {
    let mut personalized = payload.personalize(substitutions);
    personalized.inject_delivery_headers(key.campaign, key.recipient, sender);

    Envelope {
        sender: sender.clone(),
        recipient: recipient.clone(),
        subject: personalized.subject,
        body: personalized.body,
        headers: personalized.headers,
    }
}

//! Typed error handling for dispatch operations.
//!
//! The categories matter operationally:
//! - configuration errors are terminal for the task and surface as
//!   operator alerts;
//! - transport errors are terminal for the task and feed the bounce
//!   classifier, never an alert by themselves;
//! - rate-limit blocks are not errors at all — they come back through
//!   [`crate::AttemptOutcome::Deferred`].

use thiserror::Error;
use volley_common::ids::{CampaignId, RelayId};

use crate::transport::TransportError;

/// Operator-actionable misconfiguration; not retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The relay has no sender addresses configured.
    #[error("Relay {0} has an empty sender pool")]
    EmptySenderPool(RelayId),

    /// The relay's sender pool holds no syntactically valid address.
    #[error("Relay {0} has no valid sender address")]
    NoValidSender(RelayId),

    /// A campaign references a relay that is not registered.
    #[error("Relay {0} is not registered")]
    RelayNotFound(RelayId),

    /// A queue entry references a campaign that is not registered.
    #[error("Campaign {0} is not registered")]
    CampaignNotFound(CampaignId),

    /// No relay was given and none is registered and active.
    #[error("No active relay available for distribution")]
    NoActiveRelay,

    /// The campaign has no message payload to deliver.
    #[error("Campaign {0} has no message payload")]
    PayloadMissing(CampaignId),
}

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Misconfiguration: terminal, surfaced as an operator alert.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The transport rejected or lost the attempt: terminal for the
    /// task, routed to the bounce classifier.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Queue store failure.
    #[error("Queue error: {0}")]
    Queue(#[from] volley_queue::QueueError),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Whether this error should page an operator
    #[must_use]
    pub const fn is_alert(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

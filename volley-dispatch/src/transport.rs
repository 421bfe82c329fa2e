//! Transport boundary: the opaque, unreliable send dependency
//!
//! The real submission path (SMTP session, provider API call) lives
//! behind this trait in a collaborator. Dispatch only cares about the
//! tri-state reality of a send: accepted, rejected with a diagnostic,
//! or lost to the network.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;
use volley_common::{address::EmailAddress, relay::RelayConfig};

/// A single-recipient message ready for submission
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: EmailAddress,
    pub recipient: EmailAddress,
    pub subject: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// Failure modes of one submission attempt
///
/// All variants are terminal for the task; re-enqueueing is a separate,
/// explicit action.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The relay answered with a protocol rejection.
    #[error("{code} {message}")]
    Rejected { code: u16, message: String },

    /// The connection could not be established or was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The relay did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Diagnostic text handed to the bounce classifier
    ///
    /// For protocol rejections this is the raw reply (`code message`),
    /// which is what the code extractor prefers.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}

/// The outbound submission dependency
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Attempt one delivery through `relay`
    ///
    /// # Errors
    /// Returns a [`TransportError`] describing why the attempt failed;
    /// the caller decides bookkeeping and classification.
    async fn send(&self, relay: &RelayConfig, envelope: &Envelope)
    -> Result<(), TransportError>;
}

/// Transport that accepts everything
///
/// Useful for local runs and load exercises where no relay should be
/// contacted; optionally sleeps per send to mimic submission latency.
#[derive(Debug, Clone, Default)]
pub struct SinkTransport {
    latency: Option<Duration>,
}

impl SinkTransport {
    #[must_use]
    pub const fn new() -> Self {
        Self { latency: None }
    }

    #[must_use]
    pub const fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }
}

#[async_trait]
impl Transport for SinkTransport {
    async fn send(
        &self,
        relay: &RelayConfig,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        trace!(
            relay = %relay.name,
            sender = %envelope.sender,
            recipient = %envelope.recipient,
            "Sink transport accepted message"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::{ids::RelayId, relay::RelayLimits};

    use super::*;

    #[test]
    fn test_rejection_diagnostic_preserves_reply() {
        let error = TransportError::Rejected {
            code: 550,
            message: "mailbox not found".to_string(),
        };
        assert_eq!(error.diagnostic(), "550 mailbox not found");
    }

    #[tokio::test]
    async fn test_sink_accepts_everything() {
        let transport = SinkTransport::new();
        let relay = RelayConfig {
            id: RelayId::generate(),
            name: "sink".to_string(),
            active: true,
            senders: vec![EmailAddress::parse("a@example.com").unwrap()],
            limits: RelayLimits::default(),
        };
        let envelope = Envelope {
            sender: EmailAddress::parse("a@example.com").unwrap(),
            recipient: EmailAddress::parse("user@example.com").unwrap(),
            subject: "hello".to_string(),
            body: "world".to_string(),
            headers: Vec::new(),
        };

        assert!(transport.send(&relay, &envelope).await.is_ok());
    }
}

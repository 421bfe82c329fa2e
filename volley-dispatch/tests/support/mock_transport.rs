//! Mock transport for integration-testing delivery scenarios
//!
//! Scripted per recipient address: unscripted recipients are accepted,
//! scripted ones fail with the configured error. Every accepted
//! envelope is recorded for verification.
#![allow(dead_code)] // Test utility module - not all methods used in every test
#![allow(clippy::unwrap_used)]

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use volley_common::relay::RelayConfig;
use volley_dispatch::{Envelope, Transport, TransportError};

/// Configurable transport double
#[derive(Debug, Default)]
pub struct MockTransport {
    failures: Mutex<HashMap<String, TransportError>>,
    accepted: Mutex<Vec<Envelope>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each send, to widen race windows under test
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Script a protocol rejection for one recipient address
    pub fn reject_recipient(&self, address: &str, code: u16, message: &str) {
        self.failures.lock().unwrap().insert(
            address.to_string(),
            TransportError::Rejected {
                code,
                message: message.to_string(),
            },
        );
    }

    /// Script a connection failure for one recipient address
    pub fn drop_recipient(&self, address: &str, message: &str) {
        self.failures.lock().unwrap().insert(
            address.to_string(),
            TransportError::Connection(message.to_string()),
        );
    }

    /// Envelopes accepted so far
    pub fn accepted(&self) -> Vec<Envelope> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        _relay: &RelayConfig,
        envelope: &Envelope,
    ) -> Result<(), TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get(&envelope.recipient.to_string())
            .cloned();

        if let Some(failure) = scripted {
            return Err(failure);
        }

        self.accepted.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

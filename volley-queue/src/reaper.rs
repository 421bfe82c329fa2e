//! Lease reaper for expired claims
//!
//! A claim is a lease, not ownership forever: if the worker holding an
//! entry crashes before resolving it, the claim goes stale and the
//! entry would otherwise never be attempted. The reaper periodically
//! clears claims older than the TTL so another worker can pick the
//! entry up.

use std::{sync::Arc, time::SystemTime};

use tokio::sync::broadcast::Receiver;
use tracing::{debug, error, warn};
use volley_common::Signal;

use crate::{config::ClaimSettings, r#trait::QueueStore};

/// Background task that returns expired claims to the pool
#[derive(Debug, Clone)]
pub struct ClaimReaper {
    store: Arc<dyn QueueStore>,
    settings: ClaimSettings,
}

impl ClaimReaper {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, settings: ClaimSettings) -> Self {
        Self { store, settings }
    }

    /// Run the reaper until a shutdown signal arrives
    pub async fn serve(self, mut shutdown: Receiver<Signal>) {
        let mut timer = tokio::time::interval(self.settings.reaper_interval());
        // Skip the immediate first tick; freshly started stores have no
        // stale claims of their own making.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.sweep(SystemTime::now()).await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            debug!("Claim reaper received shutdown signal");
                            break;
                        }
                        Err(e) => {
                            error!("Claim reaper shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// One reap pass; separated out for tests
    pub async fn sweep(&self, now: SystemTime) {
        match self.store.reclaim_expired(self.settings.ttl(), now).await {
            Ok(reclaimed) if reclaimed.is_empty() => {}
            Ok(reclaimed) => {
                for entry in &reclaimed {
                    warn!(
                        partition = %entry.partition,
                        sort_key = entry.sort_key,
                        attempt_count = entry.attempt_count,
                        "Reclaimed expired claim"
                    );
                }
            }
            Err(e) => {
                error!("Claim reaper sweep failed: {e}");
            }
        }
    }
}

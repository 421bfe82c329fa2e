//! Queue store configuration

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

const fn default_claim_ttl() -> u64 {
    300 // 5 minutes
}

const fn default_reaper_interval() -> u64 {
    30
}

/// Which backend holds the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueConfig {
    /// Transient in-memory queue; entries do not survive a restart
    Memory,

    /// Durable file-backed queue rooted at `path`
    File { path: PathBuf },
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Lease parameters for the claim protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClaimSettings {
    /// How long a claim may be held before the reaper frees it
    ///
    /// Default: 300 seconds
    #[serde(default = "default_claim_ttl")]
    pub ttl_secs: u64,

    /// How often the reaper scans for expired claims
    ///
    /// Default: 30 seconds
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_claim_ttl(),
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

impl ClaimSettings {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

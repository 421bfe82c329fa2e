//! Durable, partitioned backlog of per-recipient delivery tasks
//!
//! One partition per campaign. Within a partition every entry carries a
//! strictly increasing sort key that is never reused, and claiming is
//! exclusive: the claim runs under the partition's lock, so two workers
//! can never take the same entry. Claims are leases — a background
//! reaper returns entries whose claim outlived its TTL to the pool, so
//! a crashed worker cannot strand work.

pub mod backends;
pub mod config;
pub mod error;
pub mod reaper;
pub mod r#trait;
pub mod types;

pub use backends::{FileQueueStore, MemoryQueueStore};
pub use config::{ClaimSettings, QueueConfig};
pub use error::{QueueError, Result, SerializationError};
pub use reaper::ClaimReaper;
pub use r#trait::QueueStore;
pub use types::{PartitionId, QueueEntry};

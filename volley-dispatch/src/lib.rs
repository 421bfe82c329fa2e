//! Campaign dispatch scheduler
//!
//! This crate is the core of the bulk mailer: independent workers drain
//! a partitioned task queue, gate every attempt against per-relay
//! multi-tier rate limits, rotate fairly over each relay's sender pool,
//! deliver exactly once per recipient, and classify failures into hard
//! and soft bounces that feed recipient reachability.
//!
//! There is no central coordinator. All cross-worker coordination goes
//! through the queue store's claim protocol and the relay's atomic
//! counters.

mod attempt_log;
mod bounce;
mod completion;
mod error;
mod executor;
mod fairness;
mod processor;
mod rate_limiter;
mod registry;
mod relay_state;
mod rotator;
mod service;
mod transport;

pub use attempt_log::{AttemptLog, AttemptRecord, AttemptStatus, Page};
pub use bounce::{BounceClassifier, BounceKind, BounceRecord, classify, extract_code};
pub use completion::CompletionMonitor;
pub use error::{ConfigurationError, DispatchError};
pub use executor::{AttemptOutcome, DeliveryExecutor};
pub use fairness::{BacklogProportional, FairnessConfig, FairnessPolicy, RoundRobin};
pub use processor::{DispatchProcessor, ProcessorConfig};
pub use rate_limiter::{RateLimitStatus, RateLimiter, TierUsage};
pub use registry::{DeliveryTask, Registry, TaskStatus};
pub use relay_state::RelayHandle;
pub use rotator::SenderRotator;
pub use service::DispatchQueryService;
pub use transport::{Envelope, SinkTransport, Transport, TransportError};

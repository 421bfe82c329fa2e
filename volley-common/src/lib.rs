//! Shared types for the volley campaign dispatcher
//!
//! This crate carries the domain model used across the workspace:
//! campaign, recipient, and relay definitions, identifier newtypes,
//! email address validation, message payload helpers, and the logging
//! macros used by every service loop.

pub mod address;
pub mod campaign;
pub mod ids;
pub mod logging;
pub mod message;
pub mod recipient;
pub mod relay;

pub use tracing;

/// Signals broadcast to running services
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}

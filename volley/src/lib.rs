//! Volley: bulk email campaign dispatcher
//!
//! The root crate wires configuration, the queue store, and the
//! dispatch processor together into a runnable service. The actual
//! scheduling semantics live in `volley-dispatch`; durable queueing in
//! `volley-queue`; shared domain types in `volley-common`.

pub mod controller;

pub use controller::Volley;

//! Error types for queue store operations

use std::io;

use thiserror::Error;

use crate::types::PartitionId;

/// Top-level queue error type.
///
/// All queue operations return this error type, which categorizes
/// failures into I/O, serialization, and logical errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (entry file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Entry not found in its partition.
    #[error("Entry not found: partition {partition}, sort key {sort_key}")]
    NotFound {
        partition: PartitionId,
        sort_key: u64,
    },

    /// Persisted state could not be interpreted.
    #[error("Corrupted queue state: {0}")]
    Corrupted(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

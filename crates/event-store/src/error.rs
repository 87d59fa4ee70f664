use thiserror::Error;

use crate::Timestamp;

/// Errors that can occur when interacting with the event feed or snapshot store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// An append was attempted with no events.
    #[error("Cannot append an empty event batch")]
    EmptyAppend,

    /// An appended event would move the log backwards.
    #[error("Event timestamp {got} is behind the log head {head}")]
    OutOfOrder { head: Timestamp, got: Timestamp },

    /// No snapshot is stored under the requested key.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// The feed could not establish a subscription.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// A storage backend reported a failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

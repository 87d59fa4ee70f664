//! View model error types.

use event_store::Timestamp;
use thiserror::Error;

/// Boxed error returned by user-supplied reducers, initializers and serializers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to callers of the view model façade.
#[derive(Debug, Error)]
pub enum ViewModelError {
    /// The selector is neither the wildcard nor a non-empty identifier set.
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// A snapshot store was configured without an invariant hash.
    #[error("Field 'invariant_hash' is mandatory when using view-model snapshots")]
    MissingInvariantHash,

    /// No projection was supplied at construction.
    #[error("A projection is required to build a view model")]
    MissingProjection,

    /// No event feed was supplied at construction.
    #[error("An event feed is required to build a view model")]
    MissingFeed,

    /// The feed could not establish the view's subscription.
    #[error("Subscription for view '{key}' failed: {message}")]
    Subscription { key: String, message: String },

    /// The state serializer rejected the state.
    #[error("Serialization error: {0}")]
    Serialization(#[source] BoxError),
}

/// Result type for view model operations.
pub type Result<T> = std::result::Result<T, ViewModelError>;

/// The sticky error of a single view.
///
/// Once recorded, the view stops folding events for good and its state
/// stays at the last successfully folded value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    /// The projection's initializer failed.
    #[error("Initializer failed: {0}")]
    Init(String),

    /// A reducer failed while folding an event.
    #[error("Reducer for '{event_type}' failed at {timestamp}: {message}")]
    Reducer {
        event_type: String,
        timestamp: Timestamp,
        message: String,
    },

    /// Persisting a checkpoint failed.
    #[error("Checkpoint as of {as_of} failed: {message}")]
    Checkpoint { as_of: Timestamp, message: String },

    /// The feed refused the view's subscription.
    #[error("Subscription failed: {0}")]
    Subscription(String),
}

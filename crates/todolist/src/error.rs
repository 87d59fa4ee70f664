//! Application error types.

use thiserror::Error;

/// Errors the demo can exit with.
#[derive(Debug, Error)]
pub enum AppError {
    /// The event log rejected an append.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A view model operation failed.
    #[error("View model error: {0}")]
    ViewModel(#[from] view_model::ViewModelError),

    /// A seed event payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The metrics recorder could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result type for the demo.
pub type Result<T> = std::result::Result<T, AppError>;

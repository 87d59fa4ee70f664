//! Shared types for the view-model query engine.

pub mod types;

pub use types::AggregateId;

//! View models for the CQRS query side.
//!
//! A view model folds a [`Projection`] over an event feed and keeps the
//! result current for every selector it has been asked about:
//! - [`Selector`] and [`SubscriptionKey`] map requests to canonical cache keys
//! - [`Projection`] holds the reducer set and optional initializer
//! - [`ViewModel`] builds views on demand, deduplicates them per key and
//!   exposes read, serialize, error inspection and disposal
//!
//! With a snapshot store configured, every folded event is checkpointed so a
//! rebuilt view resumes from its last checkpoint instead of the beginning.

pub mod cache;
pub mod error;
pub mod facade;
pub mod projection;
pub mod selector;
pub mod view;

pub use cache::ViewCache;
pub use error::{BoxError, FoldError, Result, ViewModelError};
pub use facade::{StateSerializer, ViewModel, ViewModelBuilder, json_serializer};
pub use projection::{Projection, ProjectionBuilder, ViewState};
pub use selector::{Selector, SubscriptionKey, WILDCARD};
pub use view::ViewStatus;

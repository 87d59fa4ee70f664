//! Projection definitions: the reducer set folded over the event stream.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use event_store::EventEnvelope;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BoxError;

/// State a projection can materialize.
///
/// `Default` supplies the zero state when a projection has no initializer;
/// the serde bounds let checkpoints persist and restore it.
pub trait ViewState: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> ViewState for T where T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A pure reducer: `(state, event) -> state`.
pub type Reducer<S> = Arc<dyn Fn(&S, &EventEnvelope) -> Result<S, BoxError> + Send + Sync>;

/// Produces the zero state.
pub type Initializer<S> = Arc<dyn Fn() -> Result<S, BoxError> + Send + Sync>;

/// An immutable mapping from event type to reducer, plus an optional
/// initializer.
///
/// Reducer and initializer failures, including panics, are reported as
/// messages rather than propagated so the caller can record them.
pub struct Projection<S> {
    name: String,
    init: Option<Initializer<S>>,
    reducers: BTreeMap<String, Reducer<S>>,
}

impl<S> Clone for Projection<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            init: self.init.clone(),
            reducers: self.reducers.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Projection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("init", &self.init.is_some())
            .field("event_types", &self.reducers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: 'static> Projection<S> {
    /// Starts building a projection with the given name.
    pub fn builder(name: impl Into<String>) -> ProjectionBuilder<S> {
        ProjectionBuilder {
            name: name.into(),
            init: None,
            reducers: BTreeMap::new(),
        }
    }

    /// Returns the name of this projection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event types this projection folds, in sorted order.
    pub fn event_types(&self) -> Vec<String> {
        self.reducers.keys().cloned().collect()
    }

    /// Whether a reducer is registered for `event_type`.
    pub fn handles(&self, event_type: &str) -> bool {
        self.reducers.contains_key(event_type)
    }

    /// Whether the projection declares an initializer.
    pub fn has_initializer(&self) -> bool {
        self.init.is_some()
    }

    /// Runs the initializer, if any.
    pub fn initialize(&self) -> Option<Result<S, String>> {
        let init = self.init.as_ref()?;
        Some(guard(|| init()))
    }

    /// Applies the reducer for `event` to `state`.
    ///
    /// Returns `None` when no reducer is registered for the event's type.
    pub fn apply(&self, state: &S, event: &EventEnvelope) -> Option<Result<S, String>> {
        let reducer = self.reducers.get(&event.event_type)?;
        Some(guard(|| reducer(state, event)))
    }
}

fn guard<S>(f: impl FnOnce() -> Result<S, BoxError>) -> Result<S, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Builder for [`Projection`].
pub struct ProjectionBuilder<S> {
    name: String,
    init: Option<Initializer<S>>,
    reducers: BTreeMap<String, Reducer<S>>,
}

impl<S: 'static> ProjectionBuilder<S> {
    /// Sets an infallible initializer.
    pub fn init(self, init: impl Fn() -> S + Send + Sync + 'static) -> Self {
        self.try_init(move || Ok(init()))
    }

    /// Sets a fallible initializer.
    pub fn try_init(
        mut self,
        init: impl Fn() -> Result<S, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Arc::new(init));
        self
    }

    /// Registers an infallible reducer for `event_type`.
    pub fn on(
        self,
        event_type: impl Into<String>,
        reducer: impl Fn(&S, &EventEnvelope) -> S + Send + Sync + 'static,
    ) -> Self {
        self.try_on(event_type, move |state, event| Ok(reducer(state, event)))
    }

    /// Registers a fallible reducer for `event_type`, replacing any earlier one.
    pub fn try_on(
        mut self,
        event_type: impl Into<String>,
        reducer: impl Fn(&S, &EventEnvelope) -> Result<S, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.reducers.insert(event_type.into(), Arc::new(reducer));
        self
    }

    /// Builds the projection.
    pub fn build(self) -> Projection<S> {
        Projection {
            name: self.name,
            init: self.init,
            reducers: self.reducers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        count: i64,
    }

    fn event(event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id("X")
            .timestamp(1)
            .build()
    }

    fn counter_projection() -> Projection<Counter> {
        Projection::builder("counter")
            .init(|| Counter { count: 10 })
            .on("Incremented", |s: &Counter, _| Counter { count: s.count + 1 })
            .try_on("Failed", |_, _| Err("boom".into()))
            .on("Panicked", |_, _| panic!("reducer panicked"))
            .build()
    }

    #[test]
    fn event_types_exclude_initializer() {
        let projection = counter_projection();
        assert_eq!(
            projection.event_types(),
            vec!["Failed", "Incremented", "Panicked"]
        );
        assert!(projection.has_initializer());
        assert!(projection.handles("Incremented"));
        assert!(!projection.handles("Init"));
    }

    #[test]
    fn initialize_runs_initializer() {
        let projection = counter_projection();
        assert_eq!(projection.initialize(), Some(Ok(Counter { count: 10 })));

        let bare: Projection<Counter> = Projection::builder("bare").build();
        assert!(bare.initialize().is_none());
    }

    #[test]
    fn apply_folds_registered_reducer() {
        let projection = counter_projection();
        let next = projection.apply(&Counter { count: 1 }, &event("Incremented"));
        assert_eq!(next, Some(Ok(Counter { count: 2 })));
    }

    #[test]
    fn apply_unknown_type_returns_none() {
        let projection = counter_projection();
        assert!(projection.apply(&Counter::default(), &event("Unknown")).is_none());
    }

    #[test]
    fn apply_reports_reducer_errors() {
        let projection = counter_projection();
        let result = projection.apply(&Counter::default(), &event("Failed"));
        assert_eq!(result, Some(Err("boom".to_string())));
    }

    #[test]
    fn apply_captures_panics() {
        let projection = counter_projection();
        let result = projection.apply(&Counter::default(), &event("Panicked"));
        assert_eq!(result, Some(Err("reducer panicked".to_string())));
    }

    #[test]
    fn failing_initializer_is_reported() {
        let projection: Projection<Counter> = Projection::builder("broken")
            .try_init(|| Err("no zero state".into()))
            .build();
        assert_eq!(projection.initialize(), Some(Err("no zero state".to_string())));
    }
}

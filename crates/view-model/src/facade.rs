//! The view model façade: read, serialize, inspect errors, dispose.

use std::sync::Arc;

use event_store::{EventFeed, SnapshotStore};
use serde::Serialize;

use crate::cache::ViewCache;
use crate::error::{BoxError, FoldError};
use crate::projection::{Projection, ViewState};
use crate::selector::{Selector, SubscriptionKey};
use crate::view::{CheckpointTarget, View, ViewContext, ViewStatus};
use crate::{Result, ViewModelError};

/// Turns a state into its transport form for a given auth token.
///
/// Any authorization-dependent redaction is the serializer's job.
pub type StateSerializer<S> =
    Arc<dyn Fn(&S, Option<&str>) -> std::result::Result<String, BoxError> + Send + Sync>;

/// A serializer that renders the whole state as JSON, ignoring the token.
pub fn json_serializer<S: Serialize + 'static>() -> StateSerializer<S> {
    Arc::new(
        |state: &S, _token: Option<&str>| -> std::result::Result<String, BoxError> {
            Ok(serde_json::to_string(state)?)
        },
    )
}

/// Materializes view models on demand and keeps them current.
///
/// Each distinct selector gets one view, built on first read and kept
/// until disposed. The cache never evicts on its own: callers own the
/// lifetime of their views and release them with [`ViewModel::dispose`].
pub struct ViewModel<S: ViewState> {
    context: Arc<ViewContext<S>>,
    serializer: StateSerializer<S>,
    views: ViewCache<View<S>>,
}

impl<S: ViewState> ViewModel<S> {
    /// Starts configuring a view model.
    pub fn builder() -> ViewModelBuilder<S> {
        ViewModelBuilder::default()
    }

    /// Returns the projection this view model folds.
    pub fn projection(&self) -> &Projection<S> {
        &self.context.projection
    }

    /// Whether folded events are checkpointed.
    pub fn is_checkpointing(&self) -> bool {
        self.context.checkpoints.is_some()
    }

    /// Returns the current state of the view for `selector`, building the
    /// view first if it is not cached yet.
    #[tracing::instrument(skip(self), fields(projection = self.context.projection.name()))]
    pub async fn read(&self, selector: &Selector) -> Result<S> {
        let key = SubscriptionKey::resolve(selector)?;
        let (view, created) = self
            .views
            .get_or_insert_with(&key, || View::spawn(key.clone(), Arc::clone(&self.context)))
            .await;
        if created {
            tracing::info!(view = %key, "building view");
        }
        view.read().await
    }

    /// Reads the view for `selector` and passes the state through the
    /// configured serializer, returning its output unchanged.
    #[tracing::instrument(skip(self, auth_token), fields(projection = self.context.projection.name()))]
    pub async fn read_and_serialize(
        &self,
        selector: &Selector,
        auth_token: Option<&str>,
    ) -> Result<String> {
        let state = self.read(selector).await?;
        (self.serializer)(&state, auth_token).map_err(ViewModelError::Serialization)
    }

    /// Returns the sticky error of the cached view for `selector`, or `None`
    /// when the view is healthy or not cached.
    pub async fn last_error(&self, selector: &Selector) -> Result<Option<FoldError>> {
        let key = SubscriptionKey::resolve(selector)?;
        match self.views.get(&key).await {
            Some(view) => Ok(view.last_error().await),
            None => Ok(None),
        }
    }

    /// Returns the lifecycle status of the cached view for `selector`.
    pub async fn status(&self, selector: &Selector) -> Result<Option<ViewStatus>> {
        let key = SubscriptionKey::resolve(selector)?;
        match self.views.get(&key).await {
            Some(view) => Ok(Some(view.status().await)),
            None => Ok(None),
        }
    }

    /// Disposes the view for `selector`, or every view when `selector` is
    /// `None`. Disposing a view that is not cached does nothing.
    #[tracing::instrument(skip(self), fields(projection = self.context.projection.name()))]
    pub async fn dispose(&self, selector: Option<&Selector>) -> Result<()> {
        let views = match selector {
            None => self.views.drain().await,
            Some(selector) => {
                let key = SubscriptionKey::resolve(selector)?;
                self.views.remove(&key).await.into_iter().collect()
            }
        };

        for view in &views {
            view.dispose().await;
        }
        tracing::debug!(
            disposed = views.len(),
            keys = ?views.iter().map(|v| v.key().to_string()).collect::<Vec<_>>(),
            "views disposed"
        );
        Ok(())
    }

    /// Returns the number of cached views.
    pub async fn cached_views(&self) -> usize {
        self.views.len().await
    }
}

/// Builder for [`ViewModel`].
pub struct ViewModelBuilder<S> {
    projection: Option<Projection<S>>,
    feed: Option<Arc<dyn EventFeed>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    invariant_hash: Option<String>,
    serializer: Option<StateSerializer<S>>,
}

impl<S> Default for ViewModelBuilder<S> {
    fn default() -> Self {
        Self {
            projection: None,
            feed: None,
            snapshot_store: None,
            invariant_hash: None,
            serializer: None,
        }
    }
}

impl<S: ViewState> ViewModelBuilder<S> {
    /// Sets the projection to fold.
    pub fn projection(mut self, projection: Projection<S>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sets the event feed views subscribe to.
    pub fn feed(mut self, feed: Arc<dyn EventFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Enables checkpointing into `store`. Requires an invariant hash.
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    /// Sets the version tag of the projection's schema and logic. Checkpoints
    /// written under one hash are never read under another.
    pub fn invariant_hash(mut self, invariant_hash: impl Into<String>) -> Self {
        self.invariant_hash = Some(invariant_hash.into());
        self
    }

    /// Sets the serializer used by [`ViewModel::read_and_serialize`].
    /// Defaults to [`json_serializer`].
    pub fn serializer(
        mut self,
        serializer: impl Fn(&S, Option<&str>) -> std::result::Result<String, BoxError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Builds the view model.
    ///
    /// Fails when the projection or feed is missing, or when a snapshot
    /// store is configured without a non-empty invariant hash.
    pub fn build(self) -> Result<ViewModel<S>> {
        let projection = self.projection.ok_or(ViewModelError::MissingProjection)?;
        let feed = self.feed.ok_or(ViewModelError::MissingFeed)?;

        let checkpoints = match self.snapshot_store {
            Some(store) => {
                let invariant_hash = self
                    .invariant_hash
                    .filter(|hash| !hash.is_empty())
                    .ok_or(ViewModelError::MissingInvariantHash)?;
                Some(CheckpointTarget {
                    store,
                    invariant_hash,
                })
            }
            None => None,
        };

        Ok(ViewModel {
            context: Arc::new(ViewContext {
                projection,
                feed,
                checkpoints,
            }),
            serializer: self.serializer.unwrap_or_else(json_serializer::<S>),
            views: ViewCache::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{InMemoryEventStore, InMemorySnapshotStore};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: i64,
    }

    fn counter() -> Projection<Counter> {
        Projection::builder("counter")
            .init(|| Counter { count: 0 })
            .on("Incremented", |s: &Counter, _| Counter { count: s.count + 1 })
            .build()
    }

    #[test]
    fn build_requires_projection_and_feed() {
        let result = ViewModel::<Counter>::builder().build();
        assert!(matches!(result, Err(ViewModelError::MissingProjection)));

        let result = ViewModel::builder().projection(counter()).build();
        assert!(matches!(result, Err(ViewModelError::MissingFeed)));
    }

    #[test]
    fn snapshot_store_requires_invariant_hash() {
        let result = ViewModel::builder()
            .projection(counter())
            .feed(Arc::new(InMemoryEventStore::new()))
            .snapshot_store(Arc::new(InMemorySnapshotStore::new()))
            .build();
        assert!(matches!(result, Err(ViewModelError::MissingInvariantHash)));

        let result = ViewModel::builder()
            .projection(counter())
            .feed(Arc::new(InMemoryEventStore::new()))
            .snapshot_store(Arc::new(InMemorySnapshotStore::new()))
            .invariant_hash("")
            .build();
        assert!(matches!(result, Err(ViewModelError::MissingInvariantHash)));
    }

    #[test]
    fn invariant_hash_without_store_is_accepted() {
        let view_model = ViewModel::builder()
            .projection(counter())
            .feed(Arc::new(InMemoryEventStore::new()))
            .invariant_hash("v1")
            .build()
            .unwrap();
        assert!(!view_model.is_checkpointing());
        assert_eq!(view_model.projection().name(), "counter");
    }

    #[test]
    fn json_serializer_ignores_token() {
        let serializer = json_serializer::<Counter>();
        let out = serializer(&Counter { count: 3 }, Some("token")).unwrap();
        assert_eq!(out, r#"{"count":3}"#);
    }

    #[tokio::test]
    async fn invalid_selector_leaves_cache_untouched() {
        let view_model = ViewModel::builder()
            .projection(counter())
            .feed(Arc::new(InMemoryEventStore::new()))
            .build()
            .unwrap();

        let result = view_model.read(&Selector::Aggregates(Vec::new())).await;
        assert!(matches!(result, Err(ViewModelError::InvalidSelector(_))));
        assert_eq!(view_model.cached_views().await, 0);
    }

    #[tokio::test]
    async fn last_error_and_status_for_unknown_view() {
        let view_model = ViewModel::builder()
            .projection(counter())
            .feed(Arc::new(InMemoryEventStore::new()))
            .build()
            .unwrap();

        let selector = Selector::aggregates(["X"]);
        assert_eq!(view_model.last_error(&selector).await.unwrap(), None);
        assert_eq!(view_model.status(&selector).await.unwrap(), None);
    }
}

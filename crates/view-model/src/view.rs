//! View instances: initial state, subscription and the event fold.
//!
//! A view moves through [`ViewStatus::Initializing`] while it restores a
//! checkpoint and attaches to the feed, then to [`ViewStatus::Ready`]. A
//! failing initializer, reducer, checkpoint or subscription moves it to
//! [`ViewStatus::Faulted`] for good; the state stays at its last good value.
//! Disposing a view moves it to [`ViewStatus::Disposed`], whether or not it
//! ever attached.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::{
    EventEnvelope, EventFeed, EventHandler, EventId, Snapshot, SnapshotStore, StartPosition,
    SubscribeOptions, Subscription, Timestamp,
};
use tokio::sync::{Mutex, RwLock, watch};

use crate::error::FoldError;
use crate::projection::{Projection, ViewState};
use crate::selector::SubscriptionKey;
use crate::{Result, ViewModelError};

/// Lifecycle of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    /// Restoring a checkpoint or waiting for the feed's backfill.
    Initializing,
    /// Attached to the feed and folding events.
    Ready,
    /// A sticky error halted folding.
    Faulted,
    /// Detached from the feed. The state is frozen where folding stopped.
    Disposed,
}

/// Where checkpoints for a view model go.
#[derive(Clone)]
pub(crate) struct CheckpointTarget {
    pub(crate) store: Arc<dyn SnapshotStore>,
    pub(crate) invariant_hash: String,
}

/// Everything a view needs from its view model, shared by all views.
pub(crate) struct ViewContext<S> {
    pub(crate) projection: Projection<S>,
    pub(crate) feed: Arc<dyn EventFeed>,
    pub(crate) checkpoints: Option<CheckpointTarget>,
}

/// How folded events are made durable. Chosen once per view.
enum FoldStrategy {
    Plain,
    Checkpointing {
        store: Arc<dyn SnapshotStore>,
        snapshot_key: String,
    },
}

/// Events already folded at the most recent timestamp.
///
/// Several events can share a timestamp, and a checkpoint's cursor sits
/// just before that timestamp, so resuming re-delivers all of them. The ids
/// recorded here let the fold skip the ones the checkpoint already holds.
#[derive(Debug, Default)]
struct Boundary {
    timestamp: Option<Timestamp>,
    applied: HashSet<EventId>,
}

impl Boundary {
    fn restored(as_of: Timestamp, applied: Vec<EventId>) -> Self {
        Self {
            timestamp: Some(as_of.next()),
            applied: applied.into_iter().collect(),
        }
    }

    fn contains(&self, event: &EventEnvelope) -> bool {
        self.timestamp == Some(event.timestamp) && self.applied.contains(&event.event_id)
    }

    fn record(&mut self, event: &EventEnvelope) {
        if self.timestamp != Some(event.timestamp) {
            self.timestamp = Some(event.timestamp);
            self.applied.clear();
        }
        self.applied.insert(event.event_id);
    }

    fn applied(&self) -> Vec<EventId> {
        self.applied.iter().copied().collect()
    }
}

struct FoldState<S> {
    state: S,
    last_error: Option<FoldError>,
    boundary: Boundary,
}

/// The fold half of a view. Only the feed's handler writes to it.
struct Fold<S> {
    key: SubscriptionKey,
    projection: Projection<S>,
    strategy: FoldStrategy,
    inner: RwLock<FoldState<S>>,
}

impl<S: ViewState> Fold<S> {
    fn fault(&self, fold: &mut FoldState<S>, error: FoldError) {
        tracing::warn!(
            view = %self.key,
            projection = self.projection.name(),
            error = %error,
            "view faulted; folding halted"
        );
        metrics::counter!("view_model_fold_failures").increment(1);
        fold.last_error = Some(error);
    }

    async fn checkpoint(&self, fold: &mut FoldState<S>, event: &EventEnvelope) {
        let FoldStrategy::Checkpointing {
            store,
            snapshot_key,
        } = &self.strategy
        else {
            return;
        };

        let as_of = event.timestamp.prev();
        let saved = match Snapshot::from_state(as_of, fold.boundary.applied(), &fold.state) {
            Ok(snapshot) => store
                .save_snapshot(snapshot_key, snapshot)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match saved {
            Ok(()) => metrics::counter!("view_model_checkpoints_saved").increment(1),
            Err(message) => self.fault(fold, FoldError::Checkpoint { as_of, message }),
        }
    }
}

#[async_trait]
impl<S: ViewState> EventHandler for Fold<S> {
    async fn handle(&self, event: &EventEnvelope) {
        // Explicit-identifier feeds deliver every type; only declared ones fold.
        if !event.is_typed() || !self.projection.handles(&event.event_type) {
            return;
        }

        let mut fold = self.inner.write().await;
        if fold.last_error.is_some() {
            return;
        }
        if fold.boundary.contains(event) {
            tracing::trace!(view = %self.key, event_id = %event.event_id, "skipping checkpointed event");
            return;
        }

        match self.projection.apply(&fold.state, event) {
            Some(Ok(next)) => {
                fold.state = next;
                fold.boundary.record(event);
                metrics::counter!("view_model_events_folded").increment(1);
            }
            Some(Err(message)) => {
                let error = FoldError::Reducer {
                    event_type: event.event_type.clone(),
                    timestamp: event.timestamp,
                    message,
                };
                self.fault(&mut fold, error);
                return;
            }
            None => return,
        }

        self.checkpoint(&mut fold, event).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Pending,
    Attached,
    Detached,
    Unavailable(String),
}

enum SubscriptionSlot {
    Pending,
    Active(Subscription),
    Disposed,
}

/// A materialized view for one subscription key.
pub(crate) struct View<S> {
    fold: Arc<Fold<S>>,
    readiness: watch::Sender<Readiness>,
    subscription: Mutex<SubscriptionSlot>,
}

impl<S: ViewState> View<S> {
    /// Creates a view for `key` and starts establishing it in the background.
    ///
    /// Does not suspend, so it can run while the cache is locked.
    pub(crate) fn spawn(key: SubscriptionKey, context: Arc<ViewContext<S>>) -> Arc<Self> {
        let strategy = match &context.checkpoints {
            Some(target) => FoldStrategy::Checkpointing {
                store: Arc::clone(&target.store),
                snapshot_key: key.snapshot_key(&target.invariant_hash),
            },
            None => FoldStrategy::Plain,
        };

        let fold = Arc::new(Fold {
            key,
            projection: context.projection.clone(),
            strategy,
            inner: RwLock::new(FoldState {
                state: S::default(),
                last_error: None,
                boundary: Boundary::default(),
            }),
        });

        let (readiness, _) = watch::channel(Readiness::Pending);
        let view = Arc::new(Self {
            fold,
            readiness,
            subscription: Mutex::new(SubscriptionSlot::Pending),
        });

        tokio::spawn(Arc::clone(&view).establish(context));
        view
    }

    pub(crate) fn key(&self) -> &SubscriptionKey {
        &self.fold.key
    }

    #[tracing::instrument(skip_all, fields(view = %self.fold.key, projection = self.fold.projection.name()))]
    async fn establish(self: Arc<Self>, context: Arc<ViewContext<S>>) {
        let checkpoint = match &self.fold.strategy {
            FoldStrategy::Checkpointing {
                store,
                snapshot_key,
            } => load_checkpoint(store.as_ref(), snapshot_key).await,
            FoldStrategy::Plain => None,
        };

        let start = {
            let mut fold = self.fold.inner.write().await;
            match checkpoint {
                Some(Checkpoint {
                    as_of,
                    applied,
                    state,
                }) => {
                    tracing::debug!(%as_of, "resuming from checkpoint");
                    fold.state = state;
                    fold.boundary = Boundary::restored(as_of, applied);
                    StartPosition::After(as_of)
                }
                None => {
                    match self.fold.projection.initialize() {
                        Some(Ok(state)) => fold.state = state,
                        Some(Err(message)) => self.fold.fault(&mut fold, FoldError::Init(message)),
                        None => {}
                    }
                    StartPosition::Beginning
                }
            }
        };

        if matches!(*self.subscription.lock().await, SubscriptionSlot::Disposed) {
            tracing::debug!("view disposed before subscribing");
            self.readiness.send_replace(Readiness::Detached);
            return;
        }

        let handler: Arc<dyn EventHandler> = self.fold.clone();
        let options = SubscribeOptions::starting(start);
        let subscribed = if self.fold.key.is_wildcard() {
            context
                .feed
                .subscribe_by_event_types(self.fold.projection.event_types(), handler, options)
                .await
        } else {
            context
                .feed
                .subscribe_by_aggregate_ids(self.fold.key.aggregate_ids().to_vec(), handler, options)
                .await
        };

        match subscribed {
            Ok(subscription) => {
                let mut slot = self.subscription.lock().await;
                let readiness = if matches!(*slot, SubscriptionSlot::Disposed) {
                    subscription.unsubscribe();
                    tracing::debug!("view disposed while subscribing");
                    Readiness::Detached
                } else {
                    *slot = SubscriptionSlot::Active(subscription);
                    tracing::debug!("view ready");
                    Readiness::Attached
                };
                // Published under the slot lock so a concurrent dispose observes it.
                self.readiness.send_replace(readiness);
                drop(slot);
            }
            Err(e) => {
                let message = e.to_string();
                {
                    let mut fold = self.fold.inner.write().await;
                    if fold.last_error.is_none() {
                        self.fold
                            .fault(&mut fold, FoldError::Subscription(message.clone()));
                    }
                }
                self.readiness.send_replace(Readiness::Unavailable(message));
            }
        }
    }

    async fn ready(&self) -> Readiness {
        let mut rx = self.readiness.subscribe();
        match rx.wait_for(|r| *r != Readiness::Pending).await {
            Ok(readiness) => readiness.clone(),
            Err(_) => Readiness::Unavailable("view was dropped while initializing".to_string()),
        }
    }

    /// Waits for the view to attach, then returns its current state.
    pub(crate) async fn read(&self) -> Result<S> {
        if let Readiness::Unavailable(message) = self.ready().await {
            return Err(ViewModelError::Subscription {
                key: self.fold.key.to_string(),
                message,
            });
        }
        Ok(self.fold.inner.read().await.state.clone())
    }

    /// Waits for the view to attach, then returns its sticky error.
    pub(crate) async fn last_error(&self) -> Option<FoldError> {
        self.ready().await;
        self.fold.inner.read().await.last_error.clone()
    }

    pub(crate) async fn status(&self) -> ViewStatus {
        let readiness = self.readiness.borrow().clone();
        match readiness {
            Readiness::Pending => return ViewStatus::Initializing,
            Readiness::Detached => return ViewStatus::Disposed,
            Readiness::Attached | Readiness::Unavailable(_) => {}
        }
        if self.fold.inner.read().await.last_error.is_some() {
            ViewStatus::Faulted
        } else {
            ViewStatus::Ready
        }
    }

    /// Detaches the view from the feed, now or as soon as its pending
    /// subscription resolves. Folded state and saved checkpoints are kept.
    pub(crate) async fn dispose(&self) {
        let previous = std::mem::replace(
            &mut *self.subscription.lock().await,
            SubscriptionSlot::Disposed,
        );
        if let SubscriptionSlot::Active(subscription) = previous {
            subscription.unsubscribe();
        }
        // A pending establish reports the detach itself once its subscription resolves.
        self.readiness.send_if_modified(|readiness| {
            let attached = *readiness == Readiness::Attached;
            if attached {
                *readiness = Readiness::Detached;
            }
            attached
        });
        tracing::debug!(view = %self.fold.key, "view disposed");
    }
}

impl<S> Drop for View<S> {
    fn drop(&mut self) {
        let slot = std::mem::replace(self.subscription.get_mut(), SubscriptionSlot::Disposed);
        if let SubscriptionSlot::Active(subscription) = slot {
            subscription.unsubscribe();
        }
    }
}

/// A decoded checkpoint ready to resume from.
struct Checkpoint<S> {
    as_of: Timestamp,
    applied: Vec<EventId>,
    state: S,
}

/// Loads and decodes a checkpoint. Any failure, including absence, counts
/// as no checkpoint. Checkpoints without a usable cursor are ignored too.
async fn load_checkpoint<S: ViewState>(
    store: &dyn SnapshotStore,
    snapshot_key: &str,
) -> Option<Checkpoint<S>> {
    let mut snapshot = match store.load_snapshot(snapshot_key).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::debug!(snapshot_key, error = %e, "no checkpoint available");
            return None;
        }
    };

    if !snapshot.as_of.is_positive() {
        tracing::debug!(snapshot_key, as_of = %snapshot.as_of, "checkpoint cursor unusable");
        return None;
    }

    let as_of = snapshot.as_of;
    let applied = std::mem::take(&mut snapshot.applied);
    match snapshot.into_state::<S>() {
        Ok(state) => Some(Checkpoint {
            as_of,
            applied,
            state,
        }),
        Err(e) => {
            tracing::debug!(snapshot_key, error = %e, "checkpoint state unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;

    fn event(timestamp: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("Incremented")
            .aggregate_id("X")
            .timestamp(timestamp)
            .build()
    }

    #[test]
    fn boundary_tracks_events_at_latest_timestamp() {
        let mut boundary = Boundary::default();
        let a = event(3);
        let b = event(3);
        let c = event(4);

        boundary.record(&a);
        boundary.record(&b);
        assert_eq!(boundary.timestamp, Some(Timestamp::new(3)));
        assert_eq!(boundary.applied.len(), 2);
        assert!(boundary.contains(&a));
        assert!(boundary.contains(&b));

        boundary.record(&c);
        assert_eq!(boundary.applied(), vec![c.event_id]);
        assert!(!boundary.contains(&a));
    }

    #[test]
    fn boundary_holds_a_long_run_of_equal_timestamps() {
        let mut boundary = Boundary::default();
        let run: Vec<_> = (0..2_000).map(|_| event(9)).collect();
        for e in &run {
            assert!(!boundary.contains(e));
            boundary.record(e);
        }

        assert_eq!(boundary.applied().len(), run.len());
        assert!(run.iter().all(|e| boundary.contains(e)));

        let restored = Boundary::restored(Timestamp::new(8), boundary.applied());
        assert!(run.iter().all(|e| restored.contains(e)));
        assert!(!restored.contains(&event(9)));
    }

    #[test]
    fn restored_boundary_matches_redelivered_events() {
        let folded = event(7);
        let sibling = event(7);

        let boundary = Boundary::restored(folded.timestamp.prev(), vec![folded.event_id]);
        assert!(boundary.contains(&folded));
        assert!(!boundary.contains(&sibling));
    }

    fn context(store: &InMemoryEventStore) -> Arc<ViewContext<u64>> {
        Arc::new(ViewContext {
            projection: Projection::builder("count")
                .on("Incremented", |count: &u64, _| count + 1)
                .build(),
            feed: Arc::new(store.clone()),
            checkpoints: None,
        })
    }

    #[tokio::test]
    async fn disposed_view_reports_disposed_even_if_never_attached() {
        let store = InMemoryEventStore::new();
        let view = View::spawn(SubscriptionKey::All, context(&store));

        view.dispose().await;

        assert_eq!(view.read().await.unwrap(), 0);
        assert_eq!(view.status().await, ViewStatus::Disposed);
        assert_eq!(store.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn disposing_an_attached_view_reports_disposed() {
        let store = InMemoryEventStore::new();
        let view = View::spawn(SubscriptionKey::All, context(&store));
        view.read().await.unwrap();
        assert_eq!(view.status().await, ViewStatus::Ready);

        view.dispose().await;

        assert_eq!(view.status().await, ViewStatus::Disposed);
        assert_eq!(view.read().await.unwrap(), 0);
    }
}

//! Event feed contract consumed by the query side.
//!
//! A feed delivers an ordered, replayable stream of events in two phases:
//! historical backfill from a cursor, then live continuation. Subscribing
//! resolves only once the backfill has been handed to the handler and live
//! delivery is attached.

use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, Result, Timestamp};

/// Where replay starts for a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Replay the whole log.
    #[default]
    Beginning,
    /// Replay events whose timestamp is strictly greater than the given one.
    After(Timestamp),
}

impl StartPosition {
    /// Whether an event at `timestamp` falls inside the replay window.
    pub fn admits(&self, timestamp: Timestamp) -> bool {
        match self {
            StartPosition::Beginning => true,
            StartPosition::After(cursor) => timestamp > *cursor,
        }
    }
}

/// Options for opening a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliver historical events before live ones. When false the
    /// subscription is live-only.
    pub include_historical: bool,

    /// Replay cursor for the historical phase.
    pub start: StartPosition,
}

impl SubscribeOptions {
    /// Full delivery (history plus live) from the beginning of the log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Full delivery starting after the given position.
    pub fn starting(start: StartPosition) -> Self {
        Self {
            include_historical: true,
            start,
        }
    }

    /// Live delivery only.
    pub fn live_only() -> Self {
        Self {
            include_historical: false,
            start: StartPosition::Beginning,
        }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            include_historical: true,
            start: StartPosition::Beginning,
        }
    }
}

/// Receives events from a subscription.
///
/// A feed invokes the handler of one subscription sequentially: the next
/// event is not delivered until the previous `handle` call has returned.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope);
}

/// Handle to an attached subscription.
///
/// Calling [`Subscription::unsubscribe`] detaches live delivery. Dropping the
/// handle without unsubscribing leaves the subscription attached.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when unsubscribed.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Detaches the subscription.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.cancel.is_some())
            .finish()
    }
}

/// A source of historical and live events.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Subscribes to every event belonging to one of `aggregate_ids`.
    async fn subscribe_by_aggregate_ids(
        &self,
        aggregate_ids: Vec<AggregateId>,
        handler: std::sync::Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription>;

    /// Subscribes to every event whose type is one of `event_types`.
    async fn subscribe_by_event_types(
        &self,
        event_types: Vec<String>,
        handler: std::sync::Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription>;
}

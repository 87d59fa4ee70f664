use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Timestamp,
    feed::{EventFeed, EventHandler, SubscribeOptions, Subscription},
    snapshot::SnapshotStore,
};

/// Which events a subscriber receives.
#[derive(Debug, Clone)]
enum Filter {
    AggregateIds(HashSet<AggregateId>),
    EventTypes(HashSet<String>),
}

impl Filter {
    fn matches(&self, event: &EventEnvelope) -> bool {
        match self {
            Filter::AggregateIds(ids) => ids.contains(&event.aggregate_id),
            Filter::EventTypes(types) => types.contains(&event.event_type),
        }
    }
}

struct Subscriber {
    filter: Filter,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    subscribers: Vec<Subscriber>,
}

impl Log {
    fn head(&self) -> Option<Timestamp> {
        self.events.last().map(|e| e.timestamp)
    }
}

/// In-memory event log that doubles as an [`EventFeed`].
///
/// Appends fan out to live subscribers while the log lock is held, and new
/// subscriptions take their historical snapshot under the same lock, so the
/// hand-off from backfill to live delivery neither drops nor repeats events.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends events to the log and pushes them to matching live subscribers.
    ///
    /// Timestamps must not go backwards, within the batch or relative to the
    /// current head. Returns the new head.
    pub async fn append(&self, events: Vec<EventEnvelope>) -> Result<Timestamp> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend);
        }

        let mut log = self.log.write().await;

        let mut head = log.head();
        for event in &events {
            if let Some(current) = head
                && event.timestamp < current
            {
                return Err(EventStoreError::OutOfOrder {
                    head: current,
                    got: event.timestamp,
                });
            }
            head = Some(event.timestamp);
        }
        let Some(head) = head else {
            return Err(EventStoreError::EmptyAppend);
        };

        let appended = events.len();
        for event in events {
            log.subscribers.retain(|subscriber| {
                if !subscriber.filter.matches(&event) {
                    return !subscriber.tx.is_closed();
                }
                subscriber.tx.send(event.clone()).is_ok()
            });
            log.events.push(event);
        }

        metrics::counter!("event_store_events_appended").increment(appended as u64);
        tracing::debug!(appended, %head, "events appended");

        Ok(head)
    }

    /// Returns a copy of every event in log order.
    pub async fn events(&self) -> Vec<EventEnvelope> {
        self.log.read().await.events.clone()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Returns the timestamp of the most recent event.
    pub async fn head(&self) -> Option<Timestamp> {
        self.log.read().await.head()
    }

    /// Returns the number of attached live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        let mut log = self.log.write().await;
        log.subscribers.retain(|s| !s.tx.is_closed());
        log.subscribers.len()
    }

    async fn subscribe(
        &self,
        filter: Filter,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let history: Vec<EventEnvelope> = {
            let mut log = self.log.write().await;
            let history = if options.include_historical {
                log.events
                    .iter()
                    .filter(|e| filter.matches(e) && options.start.admits(e.timestamp))
                    .cloned()
                    .collect()
            } else {
                Vec::new()
            };
            log.subscribers.push(Subscriber { filter, tx });
            history
        };

        tracing::debug!(backfill = history.len(), "subscription attached");

        for event in &history {
            handler.handle(event).await;
        }

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle(&event).await;
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }
}

#[async_trait]
impl EventFeed for InMemoryEventStore {
    async fn subscribe_by_aggregate_ids(
        &self,
        aggregate_ids: Vec<AggregateId>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let filter = Filter::AggregateIds(aggregate_ids.into_iter().collect());
        self.subscribe(filter, handler, options).await
    }

    async fn subscribe_by_event_types(
        &self,
        event_types: Vec<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let filter = Filter::EventTypes(event_types.into_iter().collect());
        self.subscribe(filter, handler, options).await
    }
}

/// In-memory snapshot store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates a new empty snapshot store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(key).cloned()
    }

    /// Returns the number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Whether no snapshot is stored.
    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// Clears all snapshots.
    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load_snapshot(&self, key: &str) -> Result<Snapshot> {
        self.snapshots
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EventStoreError::SnapshotNotFound(key.to_string()))
    }

    async fn save_snapshot(&self, key: &str, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(key.to_string(), snapshot);
        Ok(())
    }
}

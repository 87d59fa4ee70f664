//! Event feed and snapshot store contracts for the query side, with
//! in-memory reference adapters.

pub mod error;
pub mod event;
pub mod feed;
pub mod memory;
pub mod snapshot;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Timestamp};
pub use feed::{EventFeed, EventHandler, StartPosition, SubscribeOptions, Subscription};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use snapshot::{Snapshot, SnapshotStore};

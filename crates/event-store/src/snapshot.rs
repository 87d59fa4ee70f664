use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventId, Result, Timestamp};

/// A checkpoint of a view's folded state.
///
/// `as_of` is the replay cursor to resume from: a feed started
/// `After(as_of)` re-delivers the events the checkpoint last absorbed.
/// `applied` names those already-folded events so a resuming consumer can
/// skip them instead of applying them twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Replay cursor for resuming.
    pub as_of: Timestamp,

    /// Ids of events at `as_of + 1` whose effect is already in `state`.
    #[serde(default)]
    pub applied: Vec<EventId>,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// The serialized state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(as_of: Timestamp, applied: Vec<EventId>, state: serde_json::Value) -> Self {
        Self {
            as_of,
            applied,
            taken_at: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        as_of: Timestamp,
        applied: Vec<EventId>,
        state: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(as_of, applied, serde_json::to_value(state)?))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

/// Storage for view checkpoints, addressed by an opaque string key.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the snapshot stored under `key`.
    ///
    /// Fails with [`SnapshotNotFound`](crate::EventStoreError::SnapshotNotFound)
    /// when nothing is stored, or any other error when the stored value is
    /// unreadable.
    async fn load_snapshot(&self, key: &str) -> Result<Snapshot>;

    /// Stores `snapshot` under `key`, replacing any previous one.
    async fn save_snapshot(&self, key: &str, snapshot: Snapshot) -> Result<()>;
}

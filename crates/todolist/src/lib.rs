//! Todo list demo: the cards projection served through a view model over an
//! in-memory event feed.

pub mod cards;
pub mod config;
pub mod error;

use std::sync::Arc;

use event_store::{EventEnvelope, InMemoryEventStore, InMemorySnapshotStore};
use serde::Serialize;
use view_model::ViewModel;

use crate::cards::{CARD_CREATED, Cards, ITEM_CREATED, ITEM_TOGGLED};
pub use config::Config;
pub use error::{AppError, Result};

/// Builds the cards view model over `store`, checkpointing into `snapshots`
/// when the configuration asks for it.
pub fn create_view_model(
    config: &Config,
    store: &InMemoryEventStore,
    snapshots: &InMemorySnapshotStore,
) -> Result<ViewModel<Cards>> {
    let mut builder = ViewModel::builder()
        .projection(cards::projection())
        .feed(Arc::new(store.clone()))
        .serializer(cards::serialize);

    if config.snapshots {
        builder = builder
            .snapshot_store(Arc::new(snapshots.clone()))
            .invariant_hash(config.invariant_hash.clone());
    }

    Ok(builder.build()?)
}

fn envelope<T: Serialize>(
    card_id: &str,
    timestamp: i64,
    event_type: &str,
    payload: &T,
) -> Result<EventEnvelope> {
    Ok(EventEnvelope::builder()
        .aggregate_id(card_id)
        .event_type(event_type)
        .timestamp(timestamp)
        .payload(payload)?
        .build())
}

/// Appends a small history of two cards starting after the log head.
pub async fn seed(store: &InMemoryEventStore) -> Result<()> {
    let start = store.head().await.map_or(0, |t| t.as_i64());
    let events = vec![
        envelope("groceries", start + 1, CARD_CREATED, &serde_json::json!({"name": "Groceries"}))?,
        envelope(
            "groceries",
            start + 2,
            ITEM_CREATED,
            &serde_json::json!({"item_id": "milk", "text": "Milk"}),
        )?,
        envelope(
            "groceries",
            start + 3,
            ITEM_CREATED,
            &serde_json::json!({"item_id": "eggs", "text": "Eggs"}),
        )?,
        envelope("chores", start + 4, CARD_CREATED, &serde_json::json!({"name": "Chores"}))?,
        envelope(
            "chores",
            start + 5,
            ITEM_CREATED,
            &serde_json::json!({"item_id": "dishes", "text": "Dishes"}),
        )?,
        envelope(
            "groceries",
            start + 6,
            ITEM_TOGGLED,
            &serde_json::json!({"item_id": "milk"}),
        )?,
    ];
    store.append(events).await?;
    Ok(())
}

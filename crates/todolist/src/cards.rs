//! The cards projection: todo cards and the items on them.

use std::collections::BTreeMap;

use event_store::EventEnvelope;
use serde::{Deserialize, Serialize};
use view_model::{BoxError, Projection};

pub const CARD_CREATED: &str = "TodoCardCreated";
pub const CARD_REMOVED: &str = "TodoCardRemoved";
pub const ITEM_CREATED: &str = "TodoItemCreated";
pub const ITEM_TOGGLED: &str = "TodoItemToggled";
pub const ITEM_REMOVED: &str = "TodoItemRemoved";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardCreated {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCreated {
    pub item_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    pub todos: BTreeMap<String, Todo>,
}

/// Every card the view has seen, keyed by card id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cards {
    pub cards: BTreeMap<String, Card>,
}

impl Cards {
    fn with_card(&self, event: &EventEnvelope, f: impl FnOnce(&mut Card)) -> Self {
        let mut next = self.clone();
        if let Some(card) = next.cards.get_mut(event.aggregate_id.as_str()) {
            f(card);
        }
        next
    }
}

fn card_created(state: &Cards, event: &EventEnvelope) -> Result<Cards, BoxError> {
    let CardCreated { name } = event.payload_as()?;
    let mut next = state.clone();
    next.cards.insert(
        event.aggregate_id.to_string(),
        Card {
            name,
            todos: BTreeMap::new(),
        },
    );
    Ok(next)
}

fn card_removed(state: &Cards, event: &EventEnvelope) -> Cards {
    let mut next = state.clone();
    next.cards.remove(event.aggregate_id.as_str());
    next
}

fn item_created(state: &Cards, event: &EventEnvelope) -> Result<Cards, BoxError> {
    let ItemCreated { item_id, text } = event.payload_as()?;
    Ok(state.with_card(event, |card| {
        card.todos.insert(
            item_id,
            Todo {
                text,
                checked: false,
            },
        );
    }))
}

fn item_toggled(state: &Cards, event: &EventEnvelope) -> Result<Cards, BoxError> {
    let ItemRef { item_id } = event.payload_as()?;
    Ok(state.with_card(event, |card| {
        if let Some(todo) = card.todos.get_mut(&item_id) {
            todo.checked = !todo.checked;
        }
    }))
}

fn item_removed(state: &Cards, event: &EventEnvelope) -> Result<Cards, BoxError> {
    let ItemRef { item_id } = event.payload_as()?;
    Ok(state.with_card(event, |card| {
        card.todos.remove(&item_id);
    }))
}

/// Builds the cards projection.
pub fn projection() -> Projection<Cards> {
    Projection::builder("cards")
        .init(Cards::default)
        .try_on(CARD_CREATED, card_created)
        .on(CARD_REMOVED, card_removed)
        .try_on(ITEM_CREATED, item_created)
        .try_on(ITEM_TOGGLED, item_toggled)
        .try_on(ITEM_REMOVED, item_removed)
        .build()
}

/// Serializes cards for transport. Without a token only card names and
/// item counts are exposed.
pub fn serialize(state: &Cards, auth_token: Option<&str>) -> Result<String, BoxError> {
    if auth_token.is_some_and(|token| !token.is_empty()) {
        return Ok(serde_json::to_string(state)?);
    }

    let summary: BTreeMap<&str, serde_json::Value> = state
        .cards
        .iter()
        .map(|(id, card)| {
            (
                id.as_str(),
                serde_json::json!({ "name": card.name, "todos": card.todos.len() }),
            )
        })
        .collect();
    Ok(serde_json::to_string(&serde_json::json!({ "cards": summary }))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(card: &str, timestamp: i64, event_type: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(card)
            .event_type(event_type)
            .timestamp(timestamp)
            .payload_raw(payload)
            .build()
    }

    fn fold(events: &[EventEnvelope]) -> Cards {
        let projection = projection();
        let mut state = projection.initialize().unwrap().unwrap();
        for event in events {
            state = projection.apply(&state, event).unwrap().unwrap();
        }
        state
    }

    #[test]
    fn card_lifecycle() {
        let state = fold(&[
            envelope("c1", 1, CARD_CREATED, serde_json::json!({"name": "Groceries"})),
            envelope("c1", 2, ITEM_CREATED, serde_json::json!({"item_id": "i1", "text": "Milk"})),
            envelope("c1", 3, ITEM_CREATED, serde_json::json!({"item_id": "i2", "text": "Eggs"})),
            envelope("c1", 4, ITEM_TOGGLED, serde_json::json!({"item_id": "i1"})),
            envelope("c1", 5, ITEM_REMOVED, serde_json::json!({"item_id": "i2"})),
        ]);

        let card = &state.cards["c1"];
        assert_eq!(card.name, "Groceries");
        assert_eq!(card.todos.len(), 1);
        assert!(card.todos["i1"].checked);
    }

    #[test]
    fn removed_card_disappears() {
        let state = fold(&[
            envelope("c1", 1, CARD_CREATED, serde_json::json!({"name": "Chores"})),
            envelope("c1", 2, CARD_REMOVED, serde_json::json!({})),
        ]);
        assert!(state.cards.is_empty());
    }

    #[test]
    fn items_for_unknown_cards_are_dropped() {
        let state = fold(&[envelope(
            "ghost",
            1,
            ITEM_CREATED,
            serde_json::json!({"item_id": "i1", "text": "Boo"}),
        )]);
        assert!(state.cards.is_empty());
    }

    #[test]
    fn malformed_payload_is_a_reducer_error() {
        let projection = projection();
        let event = envelope("c1", 1, CARD_CREATED, serde_json::json!({"title": 3}));
        let result = projection.apply(&Cards::default(), &event).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn serialize_redacts_without_token() {
        let state = fold(&[
            envelope("c1", 1, CARD_CREATED, serde_json::json!({"name": "Groceries"})),
            envelope("c1", 2, ITEM_CREATED, serde_json::json!({"item_id": "i1", "text": "Milk"})),
        ]);

        let public = serialize(&state, None).unwrap();
        assert_eq!(public, r#"{"cards":{"c1":{"name":"Groceries","todos":1}}}"#);

        let full = serialize(&state, Some("token")).unwrap();
        assert!(full.contains("Milk"));
    }
}

//! Selectors and their canonical cache keys.

use std::collections::BTreeSet;

use common::AggregateId;

use crate::{Result, ViewModelError};

/// The wildcard sentinel addressing every identifier.
pub const WILDCARD: &str = "*";

const SEPARATOR: char = ',';

/// What a caller asks a view model for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every identifier, folded into one aggregate state.
    All,
    /// An explicit set of identifiers.
    Aggregates(Vec<AggregateId>),
}

impl Selector {
    /// The wildcard selector.
    pub fn all() -> Self {
        Selector::All
    }

    /// Selects the given identifiers.
    pub fn aggregates<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AggregateId>,
    {
        Selector::Aggregates(ids.into_iter().map(Into::into).collect())
    }
}

/// Accepts the wire shapes a transport layer hands over: the string `"*"` or
/// an array of identifier strings.
impl TryFrom<&serde_json::Value> for Selector {
    type Error = ViewModelError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) if s == WILDCARD => Ok(Selector::All),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(AggregateId::from).ok_or_else(|| {
                        ViewModelError::InvalidSelector(format!("identifier {item} is not a string"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Selector::Aggregates),
            other => Err(ViewModelError::InvalidSelector(format!(
                "expected \"{WILDCARD}\" or an array of identifiers, got {other}"
            ))),
        }
    }
}

/// Canonical identity of a view.
///
/// Two selectors naming the same identifiers in any order, with or without
/// repeats, resolve to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionKey {
    All,
    Aggregates(Vec<AggregateId>),
}

impl SubscriptionKey {
    /// Resolves a selector, rejecting empty sets and identifiers that would
    /// make the rendered key ambiguous.
    pub fn resolve(selector: &Selector) -> Result<Self> {
        let ids = match selector {
            Selector::All => return Ok(SubscriptionKey::All),
            Selector::Aggregates(ids) => ids,
        };

        if ids.is_empty() {
            return Err(ViewModelError::InvalidSelector(
                "view models are built from a non-empty identifier set or the wildcard"
                    .to_string(),
            ));
        }

        for id in ids {
            let raw = id.as_str();
            if raw.is_empty() || raw == WILDCARD || raw.contains(SEPARATOR) {
                return Err(ViewModelError::InvalidSelector(format!(
                    "identifier '{raw}' cannot be used in a selector"
                )));
            }
        }

        let canonical: BTreeSet<AggregateId> = ids.iter().cloned().collect();
        Ok(SubscriptionKey::Aggregates(canonical.into_iter().collect()))
    }

    /// Whether this key addresses every identifier.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, SubscriptionKey::All)
    }

    /// The identifiers of an explicit key, sorted.
    pub fn aggregate_ids(&self) -> &[AggregateId] {
        match self {
            SubscriptionKey::All => &[],
            SubscriptionKey::Aggregates(ids) => ids,
        }
    }

    /// Storage key for this view's checkpoints under `invariant_hash`.
    pub fn snapshot_key(&self, invariant_hash: &str) -> String {
        format!("{invariant_hash};{self}")
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionKey::All => f.write_str(WILDCARD),
            SubscriptionKey::Aggregates(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{SEPARATOR}")?;
                    }
                    f.write_str(id.as_str())?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_passes_through() {
        let key = SubscriptionKey::resolve(&Selector::all()).unwrap();
        assert!(key.is_wildcard());
        assert_eq!(key.to_string(), "*");
    }

    #[test]
    fn permutations_resolve_to_same_key() {
        let a = SubscriptionKey::resolve(&Selector::aggregates(["b", "c", "a"])).unwrap();
        let b = SubscriptionKey::resolve(&Selector::aggregates(["a", "b", "c"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "a,b,c");
    }

    #[test]
    fn repeated_identifiers_collapse() {
        let key = SubscriptionKey::resolve(&Selector::aggregates(["x", "x"])).unwrap();
        assert_eq!(key.to_string(), "x");
    }

    #[test]
    fn empty_set_is_invalid() {
        let result = SubscriptionKey::resolve(&Selector::Aggregates(Vec::new()));
        assert!(matches!(result, Err(ViewModelError::InvalidSelector(_))));
    }

    #[test]
    fn ambiguous_identifiers_are_invalid() {
        for bad in ["", "*", "a,b"] {
            let result = SubscriptionKey::resolve(&Selector::aggregates([bad]));
            assert!(
                matches!(result, Err(ViewModelError::InvalidSelector(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn snapshot_key_prefixes_invariant_hash() {
        let key = SubscriptionKey::resolve(&Selector::aggregates(["y", "x"])).unwrap();
        assert_eq!(key.snapshot_key("v1"), "v1;x,y");
        assert_eq!(SubscriptionKey::All.snapshot_key("v1"), "v1;*");
    }

    #[test]
    fn selector_from_json() {
        assert_eq!(Selector::try_from(&json!("*")).unwrap(), Selector::All);
        assert_eq!(
            Selector::try_from(&json!(["a", "b"])).unwrap(),
            Selector::aggregates(["a", "b"])
        );
    }

    #[test]
    fn selector_from_json_rejects_wrong_shapes() {
        for value in [json!("a"), json!(null), json!({"ids": []}), json!([1, 2]), json!(3)] {
            let result = Selector::try_from(&value);
            assert!(
                matches!(result, Err(ViewModelError::InvalidSelector(_))),
                "{value} should be rejected"
            );
        }
    }
}

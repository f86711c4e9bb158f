//! `Match`: the alias bindings of one result row
//!
//! A match is immutable by convention once it has been handed out of a
//! step's result buffer: traversal always clones before merging so result
//! sets held concurrently never alias each other's bindings.

use quiver_core::{BoundValue, Document};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Match {
    bindings: HashMap<String, BoundValue>,
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, alias: &str) -> Option<&BoundValue> {
        self.bindings.get(alias)
    }

    /// The document bound to `alias`, if the binding carries one
    pub fn document(&self, alias: &str) -> Option<&Arc<Document>> {
        self.bindings.get(alias).and_then(BoundValue::as_document)
    }

    pub fn set<S: Into<String>>(&mut self, alias: S, value: BoundValue) {
        self.bindings.insert(alias.into(), value);
    }

    /// Add every binding of `other`. Aliases of two merged matches are
    /// disjoint by construction (the plan builder never joins overlapping
    /// alias sets through a merge); on the recursive re-entry of the same
    /// segment the newer binding wins.
    pub fn merge(&mut self, other: &Match) {
        for (alias, value) in &other.bindings {
            self.bindings.insert(alias.clone(), value.clone());
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Serialized join key over `aliases` (sorted by the caller); matches
    /// join across combinators when these keys are equal.
    pub fn join_key(&self, aliases: &[String]) -> String {
        let values: Vec<Value> = aliases
            .iter()
            .map(|alias| {
                self.bindings
                    .get(alias)
                    .map(BoundValue::join_key)
                    .unwrap_or(Value::Null)
            })
            .collect();
        serde_json::to_string(&values).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> BoundValue {
        BoundValue::from(Document::new(id, json!({})))
    }

    #[test]
    fn test_clone_does_not_alias_bindings() {
        let mut original = Match::new();
        original.set("a", doc("users/1"));

        let mut cloned = original.clone();
        cloned.set("b", doc("users/2"));

        assert!(original.get("b").is_none());
        assert!(cloned.get("a").is_some());
    }

    #[test]
    fn test_merge_adds_disjoint_bindings() {
        let mut left = Match::new();
        left.set("a", doc("users/1"));
        let mut right = Match::new();
        right.set("b", doc("users/2"));

        left.merge(&right);
        assert_eq!(left.get("b").and_then(|v| v.id()), Some("users/2"));
        assert_eq!(left.get("a").and_then(|v| v.id()), Some("users/1"));
    }

    #[test]
    fn test_join_key_ignores_other_aliases() {
        let mut a = Match::new();
        a.set("x", doc("users/1"));
        a.set("only_a", doc("users/9"));
        let mut b = Match::new();
        b.set("x", doc("users/1"));

        let key = vec!["x".to_string()];
        assert_eq!(a.join_key(&key), b.join_key(&key));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn join_key_depends_only_on_key_aliases(
                ids in prop::collection::vec("[a-z]{1,8}/[0-9]{1,4}", 1..4),
                extra in "[a-z]{1,8}/[0-9]{1,4}",
            ) {
                let aliases: Vec<String> =
                    (0..ids.len()).map(|i| format!("a{i}")).collect();
                let mut m = Match::new();
                for (alias, id) in aliases.iter().zip(&ids) {
                    m.set(alias.clone(), doc(id));
                }
                let before = m.join_key(&aliases);
                m.set("zz", doc(&extra));
                prop_assert_eq!(before, m.join_key(&aliases));
            }
        }
    }
}

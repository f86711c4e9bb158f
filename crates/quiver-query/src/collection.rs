//! Collection-destination steps
//!
//! Introduced by the optimizer in place of a whole-collection leaf standing
//! on the right side of an edge: instead of materializing the collection up
//! front, edge targets are resolved one id at a time against the document
//! store. Produces nothing under pull iteration; it only answers
//! `get_by_id`.

use crate::binding::Match;
use crate::step::{GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{BoundValue, CancellationToken, Error, Result};
use quiver_store::DocumentStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct CollectionDestinationStep {
    alias: String,
    collection: String,
    store: Arc<dyn DocumentStore>,
    token: CancellationToken,
    aliases: HashSet<String>,
    initialized: bool,
}

impl CollectionDestinationStep {
    pub fn new(
        alias: &str,
        collection: &str,
        store: Arc<dyn DocumentStore>,
        token: CancellationToken,
    ) -> Self {
        let mut aliases = HashSet::new();
        aliases.insert(alias.to_string());
        Self {
            alias: alias.to_string(),
            collection: collection.to_string(),
            store,
            token,
            aliases,
            initialized: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl GraphQueryStep for CollectionDestinationStep {
    async fn initialize(&mut self) -> Result<()> {
        self.token.check()?;
        self.initialized = true;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        self.token.check()?;
        if !self.initialized {
            return Err(Error::Internal(
                "get_next called on an uninitialized collection step".to_string(),
            ));
        }
        Ok(None)
    }

    // Never reports empty: emptiness of a collection is unknown without a
    // scan, and an empty answer here would wrongly short-circuit the join.
    fn is_empty(&self) -> bool {
        false
    }

    fn all_aliases(&self) -> &HashSet<String> {
        &self.aliases
    }

    fn output_alias(&self) -> &str {
        &self.alias
    }

    fn get_by_id(&self, id: &str) -> Result<Vec<Match>> {
        if !self.store.in_collection(id, &self.collection) {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .load(id)
            .map(|doc| {
                let mut m = Match::new();
                m.set(&self.alias, BoundValue::Document(doc));
                vec![m]
            })
            .unwrap_or_default())
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        Box::new(CollectionDestinationStep::new(
            &self.alias,
            &self.collection,
            self.store.clone(),
            self.token.clone(),
        ))
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        if let Some(id) = m.get(&self.alias).and_then(|v| v.id()) {
            debug.add_node(&self.alias, id);
        }
    }

    fn gather_leaves(&self, _out: &mut Vec<LeafQueryInfo>) {
        // direct lookups need no index coordination
    }

    fn rewrite_destinations(
        self: Box<Self>,
        _store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::Document;
    use quiver_store::InMemoryDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_by_id_respects_collection() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.put("Users", Document::new("users/1", json!({"Name": "Alice"})));
        store.put("Dogs", Document::new("dogs/1", json!({"Name": "Arava"})));

        let mut step = CollectionDestinationStep::new(
            "u",
            "Users",
            store as Arc<dyn DocumentStore>,
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        let hits = step.get_by_id("users/1").unwrap();
        assert_eq!(hits.len(), 1);
        assert!(step.get_by_id("dogs/1").unwrap().is_empty());
        assert!(step.get_by_id("users/404").unwrap().is_empty());

        // iteration yields nothing; lookups are the only access path
        assert!(step.get_next().unwrap().is_none());
        assert!(!step.is_empty());
    }
}

//! Leaf steps: document sub-queries
//!
//! A `DocumentQueryStep` materializes one WITH-clause sub-query at
//! initialization and serves pull iteration plus indexed lookup by document
//! id (the join entry point for edge hops).

use crate::ast::WithQuery;
use crate::binding::Match;
use crate::step::{CollectionScanInfo, GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{BoundValue, CancellationToken, Error, Etag, Result};
use quiver_store::{DocumentStore, SubQueryExecutor};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub struct DocumentQueryStep {
    alias: String,
    with_query: WithQuery,
    parameters: Map<String, Value>,
    executor: Arc<dyn SubQueryExecutor>,
    result_etag: Option<Etag>,
    token: CancellationToken,

    aliases: HashSet<String>,
    results: Vec<Match>,
    by_id: HashMap<String, Vec<usize>>,
    cursor: Option<usize>,
}

impl DocumentQueryStep {
    pub fn new(
        alias: &str,
        with_query: WithQuery,
        parameters: Map<String, Value>,
        executor: Arc<dyn SubQueryExecutor>,
        result_etag: Option<Etag>,
        token: CancellationToken,
    ) -> Self {
        let mut aliases = HashSet::new();
        aliases.insert(alias.to_string());
        Self {
            alias: alias.to_string(),
            with_query,
            parameters,
            executor,
            result_etag,
            token,
            aliases,
            results: Vec::new(),
            by_id: HashMap::new(),
            cursor: None,
        }
    }

    /// Canonical key identifying this sub-query across the plan
    pub fn query_string(&self) -> &str {
        &self.with_query.query
    }
}

#[async_trait]
impl GraphQueryStep for DocumentQueryStep {
    async fn initialize(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        self.token.check()?;

        let documents = self
            .executor
            .run_query(&self.with_query.query, &self.parameters, self.result_etag)
            .await?;
        debug!(
            alias = %self.alias,
            query = %self.with_query.query,
            count = documents.len(),
            "materialized document sub-query"
        );

        self.results.reserve(documents.len());
        for doc in documents {
            self.by_id
                .entry(doc.id.clone())
                .or_default()
                .push(self.results.len());
            let mut m = Match::new();
            m.set(&self.alias, BoundValue::Document(doc));
            self.results.push(m);
        }
        self.cursor = Some(0);
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        self.token.check()?;
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::Internal(
                "get_next called on an uninitialized query step".to_string(),
            ));
        };
        if *cursor >= self.results.len() {
            return Ok(None);
        }
        let m = self.results[*cursor].clone();
        *cursor += 1;
        Ok(Some(m))
    }

    fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn all_aliases(&self) -> &HashSet<String> {
        &self.aliases
    }

    fn output_alias(&self) -> &str {
        &self.alias
    }

    fn get_by_id(&self, id: &str) -> Result<Vec<Match>> {
        Ok(self
            .by_id
            .get(id)
            .map(|rows| rows.iter().map(|&i| self.results[i].clone()).collect())
            .unwrap_or_default())
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        Box::new(DocumentQueryStep::new(
            &self.alias,
            self.with_query.clone(),
            self.parameters.clone(),
            self.executor.clone(),
            self.result_etag,
            self.token.clone(),
        ))
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        if let Some(id) = m.get(&self.alias).and_then(|v| v.id()) {
            debug.add_node(&self.alias, id);
        }
    }

    fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>) {
        out.push(LeafQueryInfo {
            query: self.with_query.query.clone(),
            index: self.with_query.index.clone(),
            is_collection_query: self.with_query.collection_query().is_some(),
        });
    }

    fn rewrite_destinations(
        self: Box<Self>,
        _store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        self
    }

    fn as_collection_scan(&self) -> Option<CollectionScanInfo> {
        self.with_query
            .collection_query()
            .map(|collection| CollectionScanInfo {
                collection: collection.to_string(),
                alias: self.alias.clone(),
            })
    }
}

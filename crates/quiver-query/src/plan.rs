//! Plan construction, optimization, index coordination, and execution
//!
//! `GraphQueryPlan` turns a `GraphQuery` into a step tree: a pattern path
//! becomes a left-to-right fold of leaf steps joined by edge steps, a
//! recursive segment becomes a recursion step, and binary pattern operators
//! become set combinators. Before execution the plan can rewrite
//! whole-collection edge destinations into direct lookups, create
//! auto-indexes for uncovered sub-queries, and wait out index staleness.

use crate::ast::{BinaryOp, EdgeDefinition, GraphQuery, PathElement, PatternExpression, PatternPath};
use crate::binding::Match;
use crate::combinator::{Except, Intersection, IntersectionQueryStep, SetOp, Union};
use crate::edge::{EdgeQueryStep, SingleEdgeStep};
use crate::leaf::DocumentQueryStep;
use crate::recursion::RecursionQueryStep;
use crate::step::{GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use quiver_core::{CancellationToken, Error, Etag, Result};
use quiver_store::{DocumentStore, Index, IndexStore, QueryContext, SubQueryExecutor};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct GraphQueryPlan {
    query: GraphQuery,
    parameters: Map<String, Value>,
    identity_part_separator: char,
    result_etag: Option<Etag>,
    wait_timeout: Duration,
    token: CancellationToken,

    executor: Arc<dyn SubQueryExecutor>,
    index_store: Arc<dyn IndexStore>,
    context: Arc<dyn QueryContext>,

    root: Option<Box<dyn GraphQueryStep>>,
    identical_queries: HashMap<String, usize>,
    is_stale: bool,
}

impl GraphQueryPlan {
    pub fn new(
        query: GraphQuery,
        executor: Arc<dyn SubQueryExecutor>,
        index_store: Arc<dyn IndexStore>,
        context: Arc<dyn QueryContext>,
    ) -> Self {
        Self {
            query,
            parameters: Map::new(),
            identity_part_separator: '/',
            result_etag: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            token: CancellationToken::new(),
            executor,
            index_store,
            context,
            root: None,
            identical_queries: HashMap::new(),
            is_stale: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_identity_part_separator(mut self, separator: char) -> Self {
        self.identity_part_separator = separator;
        self
    }

    pub fn with_result_etag(mut self, etag: Etag) -> Self {
        self.result_etag = Some(etag);
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sub-queries appearing more than once in the plan, with their counts.
    /// Singleton entries are pruned: only repeated sub-queries are worth
    /// caching by the surrounding layer.
    pub fn identical_queries(&self) -> &HashMap<String, usize> {
        &self.identical_queries
    }

    /// True if any index the plan waited on was still stale when waiting
    /// stopped
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }

    fn root_mut(&mut self) -> Result<&mut Box<dyn GraphQueryStep>> {
        self.root
            .as_mut()
            .ok_or_else(|| Error::Internal("query plan has not been built".to_string()))
    }

    /// Build the step tree from the pattern AST
    pub fn build_query_plan(&mut self) -> Result<()> {
        let expression = self.query.match_clause.clone();
        let root = self.build_expression(&expression)?;

        let mut leaves = Vec::new();
        root.gather_leaves(&mut leaves);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for leaf in &leaves {
            *counts.entry(leaf.query.clone()).or_insert(0) += 1;
        }
        counts.retain(|_, count| *count > 1);
        self.identical_queries = counts;

        debug!(leaves = leaves.len(), "built query plan");
        self.root = Some(root);
        Ok(())
    }

    fn build_expression(&self, expression: &PatternExpression) -> Result<Box<dyn GraphQueryStep>> {
        match expression {
            PatternExpression::Path(path) => self.build_pattern(path),
            PatternExpression::Binary { op, left, right } => {
                if let (BinaryOp::And, PatternExpression::Negated(inner)) = (op, right.as_ref()) {
                    return Ok(self.build_combinator::<Except>(left, inner)?);
                }
                match op {
                    BinaryOp::And => self.build_combinator::<Intersection>(left, right),
                    BinaryOp::Or => self.build_combinator::<Union>(left, right),
                }
            }
            PatternExpression::Negated(_) => Err(Error::invalid_query(
                "negation is only valid as the right side of an AND",
            )),
        }
    }

    fn build_combinator<O: SetOp>(
        &self,
        left: &PatternExpression,
        right: &PatternExpression,
    ) -> Result<Box<dyn GraphQueryStep>> {
        if matches!(left, PatternExpression::Negated(_)) {
            return Err(Error::invalid_query(
                "negation is only valid as the right side of an AND",
            ));
        }
        Ok(Box::new(IntersectionQueryStep::<O>::new(
            self.build_expression(left)?,
            self.build_expression(right)?,
            self.token.clone(),
        )))
    }

    fn build_pattern(&self, path: &PatternPath) -> Result<Box<dyn GraphQueryStep>> {
        let elements = &path.elements;
        let Some(first) = elements.first() else {
            return Err(Error::invalid_query("empty pattern path"));
        };
        if first.is_edge() {
            return Err(Error::invalid_query(
                "a pattern path must start with a node",
            ));
        }

        let mut current = self.build_node_step(first.alias())?;
        let mut i = 1;
        while i < elements.len() {
            let element = &elements[i];
            let PathElement::Edge { alias, recursive } = element else {
                return Err(Error::invalid_query(format!(
                    "expected an edge after node '{}'",
                    elements[i - 1].alias()
                )));
            };

            match recursive {
                None => {
                    let edge = self.edge_definition(alias)?;
                    let (right, consumed) = self.destination_at(elements, i + 1)?;
                    current = Box::new(EdgeQueryStep::new(
                        current,
                        right,
                        edge,
                        self.parameters.clone(),
                        self.identity_part_separator,
                        self.token.clone(),
                    ));
                    i += 1 + consumed;
                }
                Some(options) => {
                    if elements.get(i + 1).is_some_and(PathElement::is_recursive) {
                        return Err(Error::invalid_query(
                            "two adjacent recursive segments cannot be chained",
                        ));
                    }
                    let hops = self.build_hop_chain(&options.pattern)?;
                    if hops.is_empty() {
                        return Err(Error::invalid_query(
                            "a recursive segment must repeat at least one edge",
                        ));
                    }
                    let mut recursion = RecursionQueryStep::new(
                        current,
                        hops,
                        options.clone(),
                        self.token.clone(),
                    );
                    i += 1;
                    // the edge right after a recursive segment continues from
                    // the final frontier
                    if let Some(PathElement::Edge {
                        alias,
                        recursive: None,
                    }) = elements.get(i)
                    {
                        let edge = self.edge_definition(alias)?;
                        let (right, consumed) = self.destination_at(elements, i + 1)?;
                        recursion.set_next(SingleEdgeStep::new(
                            edge,
                            self.parameters.clone(),
                            self.identity_part_separator,
                            right,
                        ));
                        i += 1 + consumed;
                    }
                    current = Box::new(recursion);
                }
            }
        }
        Ok(current)
    }

    /// The node step an edge lands on, if the next element is a node.
    /// Returns the step and how many elements were consumed.
    fn destination_at(
        &self,
        elements: &[PathElement],
        at: usize,
    ) -> Result<(Option<Box<dyn GraphQueryStep>>, usize)> {
        match elements.get(at) {
            Some(PathElement::Node { alias }) => {
                Ok((Some(self.build_node_step(alias)?), 1))
            }
            _ => Ok((None, 0)),
        }
    }

    /// The repeated segment of a recursive element, as runnable hops
    fn build_hop_chain(&self, pattern: &[PathElement]) -> Result<Vec<SingleEdgeStep>> {
        let mut hops = Vec::new();
        let mut i = 0;
        while i < pattern.len() {
            let PathElement::Edge { alias, recursive } = &pattern[i] else {
                return Err(Error::invalid_query(
                    "a recursive segment must alternate edges and nodes, starting with an edge",
                ));
            };
            if recursive.is_some() {
                return Err(Error::invalid_query(
                    "a recursive segment cannot contain another recursive segment",
                ));
            }
            let edge = self.edge_definition(alias)?;
            let (right, consumed) = self.destination_at(pattern, i + 1)?;
            hops.push(SingleEdgeStep::new(
                edge,
                self.parameters.clone(),
                self.identity_part_separator,
                right,
            ));
            i += 1 + consumed;
        }
        Ok(hops)
    }

    fn build_node_step(&self, alias: &str) -> Result<Box<dyn GraphQueryStep>> {
        let Some(with_query) = self.query.with_document_queries.get(alias) else {
            return Err(Error::invalid_query(format!(
                "node alias '{alias}' has no WITH clause"
            )));
        };
        Ok(Box::new(DocumentQueryStep::new(
            alias,
            with_query.clone(),
            self.parameters.clone(),
            self.executor.clone(),
            self.result_etag,
            self.token.clone(),
        )))
    }

    fn edge_definition(&self, alias: &str) -> Result<Arc<EdgeDefinition>> {
        self.query
            .with_edge_predicates
            .get(alias)
            .cloned()
            .ok_or_else(|| {
                Error::invalid_query(format!("edge alias '{alias}' has no WITH EDGES clause"))
            })
    }

    /// Replace whole-collection edge destinations with direct lookups.
    /// Result semantics are unchanged.
    pub fn optimize_query_plan(&mut self, store: &Arc<dyn DocumentStore>) -> Result<()> {
        let root = self
            .root
            .take()
            .ok_or_else(|| Error::Internal("query plan has not been built".to_string()))?;
        self.root = Some(root.rewrite_destinations(store));
        Ok(())
    }

    fn gather_leaves(&self) -> Result<Vec<LeafQueryInfo>> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| Error::Internal("query plan has not been built".to_string()))?;
        let mut leaves = Vec::new();
        root.gather_leaves(&mut leaves);
        Ok(leaves)
    }

    /// Create auto-indexes for every uncovered leaf sub-query and wait for
    /// the freshly created ones to catch up. A timeout marks the plan stale
    /// instead of failing it.
    pub async fn create_auto_indexes_and_wait_if_necessary(&mut self) -> Result<()> {
        let leaves = self.gather_leaves()?;

        // auto-index creation requires the read transaction to be closed
        self.context.close_transaction();

        let mut seen = HashSet::new();
        let mut created = Vec::new();
        for leaf in leaves {
            if leaf.index.is_some() || leaf.is_collection_query {
                continue;
            }
            if !seen.insert(leaf.query.clone()) {
                continue;
            }
            self.token.check()?;
            let matched = self
                .index_store
                .create_auto_index_if_needed(&leaf.query)
                .await?;
            if matched.created {
                info!(index = %matched.index.name(), "created auto-index");
                created.push(matched.index);
            }
        }

        if self.wait_for_indexes(created).await? {
            self.is_stale = true;
        }
        Ok(())
    }

    /// Staleness wait for the explicitly named indexes in the plan. Returns
    /// true if any of them was still stale when waiting stopped.
    pub async fn wait_for_nonstale_results(&mut self) -> Result<bool> {
        let mut indexes: Vec<Arc<dyn Index>> = Vec::new();
        let mut seen = HashSet::new();
        for leaf in self.gather_leaves()? {
            if let Some(name) = leaf.index {
                if seen.insert(name.clone()) {
                    indexes.push(self.index_store.get_index(&name)?);
                }
            }
        }

        let stale = self.wait_for_indexes(indexes).await?;
        if stale {
            self.is_stale = true;
        }
        Ok(stale)
    }

    /// Poll the given indexes until none is stale against the etag captured
    /// on the first round. Waiting is relative to the plan-start cutoff;
    /// writes arriving while we wait must not extend the wait.
    ///
    /// Each round captures the batch awaiters *before* checking staleness so
    /// a batch finishing in between is not missed, and closes the read
    /// transaction before awaiting: the awaiter's contract forbids holding
    /// one. Returns true on timeout with staleness remaining.
    async fn wait_for_indexes(&self, indexes: Vec<Arc<dyn Index>>) -> Result<bool> {
        if indexes.is_empty() {
            return Ok(false);
        }

        let started = Instant::now();
        let mut cutoff: Option<Etag> = None;
        loop {
            self.token.check()?;

            self.context.open_read_transaction();
            let cutoff = *cutoff.get_or_insert_with(|| self.context.read_last_etag());
            let mut pending = Vec::new();
            for index in &indexes {
                let awaiter = index.indexing_batch_awaiter();
                if index.is_stale(cutoff) {
                    pending.push((index.name().to_string(), awaiter));
                }
            }
            self.context.close_transaction();

            if pending.is_empty() {
                return Ok(false);
            }
            let Some(remaining) = self.wait_timeout.checked_sub(started.elapsed()) else {
                warn!("timed out waiting for indexes, returning stale results");
                return Ok(true);
            };

            let (name, awaiter) = pending.swap_remove(0);
            debug!(index = %name, cutoff, "waiting for indexing batch");
            if tokio::time::timeout(remaining, awaiter).await.is_err() {
                warn!(index = %name, "timed out waiting for indexing batch");
                return Ok(true);
            }
        }
    }

    /// Initialize the whole step tree, dependency-ordered
    pub async fn initialize(&mut self) -> Result<()> {
        self.root_mut()?.initialize().await
    }

    /// Drain the root step into a result list
    pub fn execute(&mut self) -> Result<Vec<Match>> {
        let root = self.root_mut()?;
        let mut matches = Vec::new();
        while let Some(m) = root.get_next()? {
            matches.push(m);
        }
        debug!(matches = matches.len(), "executed query plan");
        Ok(matches)
    }

    /// Record how each output match was derived
    pub fn analyze(&self, matches: &[Match]) -> Result<GraphDebugInfo> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| Error::Internal("query plan has not been built".to_string()))?;
        let mut debug_info = GraphDebugInfo::new();
        for m in matches {
            root.analyze(m, &mut debug_info);
        }
        Ok(debug_info)
    }
}

//! Variable-length (recursive) traversal
//!
//! Repeatedly applies a chain of edge hops to a frontier of matches,
//! guarding against cycles according to the configured uniqueness mode.
//! Traversal for one starting row ends when the hop bound is reached, the
//! frontier empties, or (for unbounded traversal) an iteration reaches no
//! node it has not already seen.

use crate::ast::{RecursiveKind, RecursiveOptions, Uniqueness};
use crate::binding::Match;
use crate::edge::SingleEdgeStep;
use crate::step::{GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{BoundValue, CancellationToken, Error, Result};
use quiver_store::DocumentStore;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct RecursionQueryStep {
    left: Box<dyn GraphQueryStep>,
    steps: Vec<SingleEdgeStep>,
    options: RecursiveOptions,
    next: Option<SingleEdgeStep>,
    token: CancellationToken,

    aliases: HashSet<String>,
    output_alias: String,
    results: Vec<Match>,
    cursor: Option<usize>,
}

/// One frontier element: the match so far plus its traversal bookkeeping
#[derive(Clone)]
struct PathEntry {
    m: Match,
    path: Vec<Value>,
    cur_alias: String,
    visited_edges: HashSet<String>,
}

impl RecursionQueryStep {
    pub fn new(
        left: Box<dyn GraphQueryStep>,
        steps: Vec<SingleEdgeStep>,
        options: RecursiveOptions,
        token: CancellationToken,
    ) -> Self {
        let mut aliases: HashSet<String> = left.all_aliases().iter().cloned().collect();
        for step in &steps {
            step.add_aliases(&mut aliases);
        }
        if let Some(alias) = &options.alias {
            aliases.insert(alias.clone());
        }
        let output_alias = steps
            .last()
            .map(|s| s.output_alias().to_string())
            .unwrap_or_else(|| left.output_alias().to_string());
        Self {
            left,
            steps,
            options,
            next: None,
            token,
            aliases,
            output_alias,
            results: Vec::new(),
            cursor: None,
        }
    }

    /// Wire the continuation hop the final frontier is fed into.
    /// Only valid before the plan is frozen for execution.
    pub fn set_next(&mut self, next: SingleEdgeStep) {
        next.add_aliases(&mut self.aliases);
        self.output_alias = next.output_alias().to_string();
        self.next = Some(next);
    }

    fn edge_binding_key(m: &Match, alias: &str) -> Option<String> {
        m.get(alias).map(|v| match v {
            BoundValue::Id(id) => id.clone(),
            BoundValue::Document(doc) => doc.id.clone(),
            BoundValue::Json(payload) => payload.to_string(),
        })
    }

    fn path_value(m: &Match, alias: &str) -> Value {
        match m.get(alias) {
            Some(BoundValue::Id(id)) => Value::String(id.clone()),
            Some(BoundValue::Document(doc)) => Value::String(doc.id.clone()),
            Some(BoundValue::Json(payload)) => payload.clone(),
            None => Value::Null,
        }
    }

    /// Run the whole hop chain for one frontier entry
    fn expand(&mut self, entry: &PathEntry) -> Result<Vec<Match>> {
        let mut current = vec![entry.m.clone()];
        let mut alias = entry.cur_alias.clone();
        for (hop, step) in self.steps.iter_mut().enumerate() {
            for m in &current {
                step.run(m, &alias)?;
            }
            current = step.drain();
            alias = step.output_alias().to_string();
            if current.is_empty() {
                debug!(hop, "recursive chain produced no rows");
                break;
            }
        }
        Ok(current)
    }

    /// Traverse from one starting row, collecting qualifying frontier
    /// entries according to the hop bounds and kind
    fn traverse_from(&mut self, start: Match, origin: &str) -> Result<Vec<PathEntry>> {
        let chain_output = self
            .steps
            .last()
            .map(|s| s.output_alias().to_string())
            .unwrap_or_else(|| origin.to_string());

        let mut visited_nodes = HashSet::new();
        if self.options.uniqueness == Uniqueness::UniqueNodes {
            if let Some(id) = start.get(origin).and_then(|v| v.id()) {
                visited_nodes.insert(id.to_string());
            }
        }
        // fixpoint detection for unbounded traversal
        let mut seen_nodes: HashSet<String> = visited_nodes.clone();

        let initial = PathEntry {
            m: start,
            path: Vec::new(),
            cur_alias: origin.to_string(),
            visited_edges: HashSet::new(),
        };

        let mut collected: Vec<PathEntry> = Vec::new();
        if self.options.min == 0 {
            collected.push(initial.clone());
            if self.options.kind == RecursiveKind::Shortest {
                return Ok(collected);
            }
        }

        let mut frontier = vec![initial];
        let mut depth = 0usize;
        loop {
            if let Some(max) = self.options.max {
                if depth >= max {
                    break;
                }
            }
            depth += 1;

            let mut next_frontier: Vec<PathEntry> = Vec::new();
            let mut reached_new_node = false;
            for entry in std::mem::take(&mut frontier) {
                self.token.check()?;
                for produced in self.expand(&entry)? {
                    let target_id = produced
                        .get(&chain_output)
                        .and_then(|v| v.id())
                        .map(str::to_string);

                    let mut visited_edges = entry.visited_edges.clone();
                    match self.options.uniqueness {
                        Uniqueness::UniqueNodes => {
                            let Some(id) = &target_id else { continue };
                            if !visited_nodes.insert(id.clone()) {
                                continue;
                            }
                        }
                        Uniqueness::UniqueEdges => {
                            let keys: Vec<String> = self
                                .steps
                                .iter()
                                .filter_map(|s| {
                                    Self::edge_binding_key(&produced, &s.edge().alias)
                                })
                                .collect();
                            if keys.iter().any(|k| visited_edges.contains(k)) {
                                continue;
                            }
                            visited_edges.extend(keys);
                        }
                        Uniqueness::None => {}
                    }

                    if let Some(id) = &target_id {
                        if seen_nodes.insert(id.clone()) {
                            reached_new_node = true;
                        }
                    }

                    let mut path = entry.path.clone();
                    for step in &self.steps {
                        path.push(Self::path_value(&produced, &step.edge().alias));
                    }
                    next_frontier.push(PathEntry {
                        m: produced,
                        path,
                        cur_alias: chain_output.clone(),
                        visited_edges,
                    });
                }
            }

            if next_frontier.is_empty() {
                break;
            }
            // unbounded traversal without a new node is a fixpoint
            if self.options.max.is_none() && !reached_new_node {
                break;
            }

            if depth >= self.options.min {
                match self.options.kind {
                    RecursiveKind::All => collected.extend(next_frontier.iter().cloned()),
                    RecursiveKind::Shortest => {
                        return Ok(next_frontier);
                    }
                    RecursiveKind::Longest => {
                        collected = next_frontier.clone();
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(collected)
    }

    fn finalize(&self, entry: PathEntry) -> (Match, String) {
        let mut m = entry.m;
        if let Some(alias) = &self.options.alias {
            m.set(alias, BoundValue::Json(Value::Array(entry.path)));
        }
        (m, entry.cur_alias)
    }
}

#[async_trait]
impl GraphQueryStep for RecursionQueryStep {
    async fn initialize(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        self.token.check()?;

        self.left.initialize().await?;
        self.cursor = Some(0);
        if self.left.is_empty() {
            return Ok(());
        }
        for step in &mut self.steps {
            step.initialize().await?;
        }
        if let Some(next) = &mut self.next {
            next.initialize().await?;
        }

        let origin = self.left.output_alias().to_string();
        let mut finalized: Vec<(Match, String)> = Vec::new();
        while let Some(start) = self.left.get_next()? {
            self.token.check()?;
            let entries = self.traverse_from(start, &origin)?;
            finalized.extend(entries.into_iter().map(|e| self.finalize(e)));
        }

        match &mut self.next {
            Some(next) => {
                // feed the final frontier into the continuation hop
                for (m, alias) in &finalized {
                    self.token.check()?;
                    next.run(m, alias)?;
                }
                self.results = next.drain();
            }
            None => {
                self.results = finalized.into_iter().map(|(m, _)| m).collect();
            }
        }
        debug!(results = self.results.len(), "recursive traversal complete");
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        self.token.check()?;
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::Internal(
                "get_next called on an uninitialized recursion step".to_string(),
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
        &self.output_alias
    }

    fn get_by_id(&self, _id: &str) -> Result<Vec<Match>> {
        Err(Error::Unsupported(
            "cannot get a match by id from a recursive segment".to_string(),
        ))
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        let mut cloned = RecursionQueryStep::new(
            self.left.clone_step(),
            self.steps.iter().map(SingleEdgeStep::clone_hop).collect(),
            self.options.clone(),
            self.token.clone(),
        );
        if let Some(next) = &self.next {
            cloned.set_next(next.clone_hop());
        }
        Box::new(cloned)
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        self.left.analyze(m, debug);
        if let Some(id) = m.get(&self.output_alias).and_then(|v| v.id()) {
            debug.add_node(&self.output_alias, id);
        }
    }

    fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>) {
        self.left.gather_leaves(out);
        for step in &self.steps {
            step.gather_leaves(out);
        }
        if let Some(next) = &self.next {
            next.gather_leaves(out);
        }
    }

    fn rewrite_destinations(
        mut self: Box<Self>,
        store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        let token = self.token.clone();
        self.left = self.left.rewrite_destinations(store);
        self.steps = std::mem::take(&mut self.steps)
            .into_iter()
            .map(|s| s.rewrite_destinations(store, &token))
            .collect();
        self.next = self
            .next
            .take()
            .map(|n| n.rewrite_destinations(store, &token));
        self
    }
}

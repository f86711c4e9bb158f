//! The contract every query-plan node implements
//!
//! A step is a lazily-initialized, pull-iterated producer of matches. The
//! tree's shape is fixed when the plan is built; per-instance state (the
//! initialization sentinel, cursor, and result buffer) is never shared
//! between clones.

use crate::binding::Match;
use async_trait::async_trait;
use quiver_core::{BoundValue, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use quiver_store::DocumentStore;

#[async_trait]
pub trait GraphQueryStep: Send {
    /// Run whatever work this step needs before results can be pulled.
    ///
    /// Idempotent: once started, later calls are no-ops. May suspend only
    /// while awaiting a child's initialization or an external sub-query /
    /// index wait.
    async fn initialize(&mut self) -> Result<()>;

    /// Pull the next match; `None` once drained. Not restartable.
    fn get_next(&mut self) -> Result<Option<Match>>;

    /// True if, after initialization, this step produced zero results
    fn is_empty(&self) -> bool;

    /// Every alias this subtree binds
    fn all_aliases(&self) -> &HashSet<String>;

    /// The alias downstream steps join on
    fn output_alias(&self) -> &str;

    /// Random lookup into the already materialized results by the output
    /// alias's bound id. Errors on variants that cannot support it (a
    /// plan-construction bug, not user input).
    fn get_by_id(&self, id: &str) -> Result<Vec<Match>>;

    /// A fresh, independently-cursored, uninitialized instance sharing only
    /// the immutable query/edge definitions
    fn clone_step(&self) -> Box<dyn GraphQueryStep>;

    /// Record how `m` was derived, for diagnostics
    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo);

    /// Collect the leaf sub-queries of this subtree (index coordination)
    fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>);

    /// Structural rewrite pass: replace whole-collection edge destinations
    /// with direct collection lookups. Must not change result semantics.
    fn rewrite_destinations(
        self: Box<Self>,
        store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep>;

    /// `Some` when this step is a bare collection scan the optimizer may
    /// replace
    fn as_collection_scan(&self) -> Option<CollectionScanInfo> {
        None
    }
}

/// Leaf sub-query metadata gathered for auto-index creation and staleness
#[derive(Debug, Clone, PartialEq)]
pub struct LeafQueryInfo {
    /// Canonical query text
    pub query: String,

    /// Explicitly named backing index, if any
    pub index: Option<String>,

    /// True for bare collection scans (no sense indexing those)
    pub is_collection_query: bool,
}

/// Scan info handed to the optimizer by replaceable leaves
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionScanInfo {
    pub collection: String,
    pub alias: String,
}

/// Provenance sink filled by [`GraphQueryStep::analyze`]
#[derive(Debug, Default)]
pub struct GraphDebugInfo {
    pub nodes: Vec<DebugNode>,
    pub edges: Vec<DebugEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugNode {
    pub alias: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugEdge {
    pub alias: String,
    pub from: String,
    pub to: String,
}

impl GraphDebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, alias: &str, id: &str) {
        self.nodes.push(DebugNode {
            alias: alias.to_string(),
            id: id.to_string(),
        });
    }

    pub fn add_edge(&mut self, alias: &str, from: &str, to: &str) {
        self.edges.push(DebugEdge {
            alias: alias.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

/// The id an edge binding resolved to, used when recording provenance
pub(crate) fn edge_target_id(
    value: &BoundValue,
    project: Option<&str>,
    _parameters: &Map<String, Value>,
) -> Option<String> {
    match value {
        BoundValue::Id(id) => Some(id.clone()),
        BoundValue::Document(doc) => Some(doc.id.clone()),
        BoundValue::Json(payload) => {
            let path = project?;
            match quiver_core::traverse(payload, path)? {
                Value::String(id) => Some(id),
                Value::Array(items) => items
                    .into_iter()
                    .find_map(|v| v.as_str().map(str::to_string)),
                _ => None,
            }
        }
    }
}

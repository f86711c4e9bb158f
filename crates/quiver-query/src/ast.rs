//! Pattern AST and edge definitions
//!
//! This is the output contract of the query-language parser, which lives
//! outside this crate. The plan builder consumes these types read-only; a
//! built plan shares the edge definitions (`Arc`) between every step and
//! clone that needs them.

use crate::filter::FilterExpression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A parsed graph query: the MATCH expression plus the WITH clauses that
/// declare what each alias stands for.
#[derive(Debug, Clone)]
pub struct GraphQuery {
    /// The MATCH pattern
    pub match_clause: PatternExpression,

    /// Node alias -> document sub-query
    pub with_document_queries: HashMap<String, WithQuery>,

    /// Edge alias -> edge definition
    pub with_edge_predicates: HashMap<String, Arc<EdgeDefinition>>,
}

/// A WITH clause declaring the document sub-query behind a node alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithQuery {
    /// The sub-query text, canonical form (used as the identical-subquery key)
    pub query: String,

    /// Explicit index backing this sub-query, when the user named one
    pub index: Option<String>,
}

impl WithQuery {
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
            index: None,
        }
    }

    pub fn with_index<S: Into<String>, I: Into<String>>(query: S, index: I) -> Self {
        Self {
            query: query.into(),
            index: Some(index.into()),
        }
    }

    /// The collection name, when this is a bare collection scan
    /// (`from <Collection>` with no filtering, projection, or index)
    pub fn collection_query(&self) -> Option<&str> {
        if self.index.is_some() {
            return None;
        }
        let rest = self.query.trim().strip_prefix("from ")?;
        let mut parts = rest.split_whitespace();
        let collection = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(collection)
    }
}

/// A WITH EDGE clause: which field holds the target ids, plus optional
/// filtering and projection of the edge payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDefinition {
    /// The edge's own alias in the pattern
    pub alias: String,

    /// Field path on the source document holding the target identifiers
    pub path: String,

    /// Optional WHERE filter evaluated against each edge payload
    pub where_filter: Option<FilterExpression>,

    /// Optional projection: the payload field the target ids live under
    pub project: Option<String>,
}

impl EdgeDefinition {
    pub fn new<A: Into<String>, P: Into<String>>(alias: A, path: P) -> Self {
        Self {
            alias: alias.into(),
            path: path.into(),
            where_filter: None,
            project: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.where_filter = Some(filter);
        self
    }

    pub fn with_project<S: Into<String>>(mut self, project: S) -> Self {
        self.project = Some(project.into());
        self
    }

    /// True if matching this edge evaluates payloads (WHERE or PROJECT)
    pub fn filters_payload(&self) -> bool {
        self.where_filter.is_some() || self.project.is_some()
    }
}

impl fmt::Display for EdgeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.alias, self.path)?;
        if let Some(project) = &self.project {
            write!(f, " select {project}")?;
        }
        Ok(())
    }
}

/// The MATCH expression tree: pattern paths combined with AND / OR / NOT
#[derive(Debug, Clone)]
pub enum PatternExpression {
    /// A chain `(a)-[e]->(b)-...`
    Path(PatternPath),

    /// Binary combination of two sub-patterns
    Binary {
        op: BinaryOp,
        left: Box<PatternExpression>,
        right: Box<PatternExpression>,
    },

    /// Negation; only meaningful as the right side of an AND (AND-NOT)
    Negated(Box<PatternExpression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
}

/// One pattern path, alternating node and edge elements
#[derive(Debug, Clone)]
pub struct PatternPath {
    pub elements: Vec<PathElement>,
}

impl PatternPath {
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self { elements }
    }
}

/// One element of a pattern path
#[derive(Debug, Clone)]
pub enum PathElement {
    /// `(alias)`
    Node { alias: String },

    /// `-[alias]->`, optionally a recursive segment
    Edge {
        alias: String,
        recursive: Option<RecursiveOptions>,
    },
}

impl PathElement {
    pub fn node<S: Into<String>>(alias: S) -> Self {
        PathElement::Node {
            alias: alias.into(),
        }
    }

    pub fn edge<S: Into<String>>(alias: S) -> Self {
        PathElement::Edge {
            alias: alias.into(),
            recursive: None,
        }
    }

    pub fn recursive_edge(options: RecursiveOptions) -> Self {
        PathElement::Edge {
            alias: options
                .alias
                .clone()
                .unwrap_or_else(|| "recursive".to_string()),
            recursive: Some(options),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            PathElement::Node { alias } => alias,
            PathElement::Edge { alias, .. } => alias,
        }
    }

    pub fn is_edge(&self) -> bool {
        matches!(self, PathElement::Edge { .. })
    }

    pub fn is_recursive(&self) -> bool {
        matches!(
            self,
            PathElement::Edge {
                recursive: Some(_),
                ..
            }
        )
    }
}

/// How many repetitions a recursive segment allows and which outputs it keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecursiveKind {
    /// Every qualifying depth
    All,

    /// Stop at the first qualifying depth (alias: `Lazy` in query text)
    Shortest,

    /// Only the deepest frontier reached
    Longest,
}

/// Cycle/uniqueness control during recursive traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Uniqueness {
    /// No revisit guard; termination relies on hop bounds and fixpoint
    None,

    /// A node is expanded at most once per starting row
    UniqueNodes,

    /// An edge occurrence is used at most once per path
    UniqueEdges,
}

/// Options of one recursive segment
#[derive(Debug, Clone)]
pub struct RecursiveOptions {
    /// Alias the traversed path is bound under, when requested
    pub alias: Option<String>,

    /// Minimum number of hops; zero includes the starting row itself
    pub min: usize,

    /// Maximum number of hops; `None` means bounded only by the cycle guard
    pub max: Option<usize>,

    pub kind: RecursiveKind,

    pub uniqueness: Uniqueness,

    /// The repeated segment: edge, then optionally node/edge pairs
    pub pattern: Vec<PathElement>,
}

impl RecursiveOptions {
    pub fn new(pattern: Vec<PathElement>) -> Self {
        Self {
            alias: None,
            min: 1,
            max: None,
            kind: RecursiveKind::All,
            uniqueness: Uniqueness::UniqueNodes,
            pattern,
        }
    }

    pub fn with_alias<S: Into<String>>(mut self, alias: S) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_bounds(mut self, min: usize, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_kind(mut self, kind: RecursiveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = uniqueness;
        self
    }
}

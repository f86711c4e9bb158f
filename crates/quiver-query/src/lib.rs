//! Quiver Query Engine
//!
//! The graph-pattern query core: builds a composable query-plan tree from a
//! parsed pattern AST, matches edge-valued document fields hop by hop,
//! traverses variable-length (recursive) segments, combines sub-plans with
//! set algebra, and coordinates auto-index creation and index staleness
//! before execution.
//!
//! # Modules
//!
//! - `ast` - Pattern AST and edge definitions (the parser's output contract)
//! - `filter` - WHERE/PROJECT evaluation over edge payloads
//! - `binding` - `Match`, the alias binding set of one result row
//! - `step` - The `GraphQueryStep` contract shared by every plan node
//! - `leaf` - Document sub-query steps
//! - `collection` - Collection-destination steps introduced by the optimizer
//! - `edge` - Single-hop edge matching
//! - `recursion` - Variable-length traversal
//! - `combinator` - AND / OR / AND-NOT set combination
//! - `plan` - Plan construction, optimization, staleness, execution

pub mod ast;
pub mod binding;
pub mod collection;
pub mod combinator;
pub mod edge;
pub mod filter;
pub mod leaf;
pub mod plan;
pub mod recursion;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

pub use ast::{
    BinaryOp, EdgeDefinition, GraphQuery, PathElement, PatternExpression, PatternPath,
    RecursiveKind, RecursiveOptions, Uniqueness, WithQuery,
};
pub use binding::Match;
pub use collection::CollectionDestinationStep;
pub use combinator::{Except, Intersection, IntersectionQueryStep, Union};
pub use edge::{EdgeQueryStep, SingleEdgeMatcher, SingleEdgeStep};
pub use filter::{ComparisonOp, FilterExpression, FilterValue};
pub use leaf::DocumentQueryStep;
pub use plan::GraphQueryPlan;
pub use recursion::RecursionQueryStep;
pub use step::{CollectionScanInfo, GraphDebugInfo, GraphQueryStep, LeafQueryInfo};

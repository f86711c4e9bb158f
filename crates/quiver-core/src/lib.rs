//! Quiver Core Library
//!
//! This crate provides the fundamental types, traits, and error handling
//! for the Quiver graph query engine.
//!
//! # Overview
//!
//! Quiver is the graph-pattern query core of a document database: it matches
//! chains of documents connected by edge-like fields, with recursive
//! traversal and set-algebra combination of sub-patterns.
//!
//! # Modules
//!
//! - `document` - Document and binding value types
//! - `value` - Path traversal and id extraction over semi-structured values
//! - `error` - Error types and result aliases
//! - `cancel` - Cooperative cancellation

pub mod cancel;
pub mod document;
pub mod error;
pub mod value;

pub use cancel::CancellationToken;
pub use document::{BoundValue, Document, Etag};
pub use error::{Error, Result};
pub use value::{extract_referenced_ids, traverse};

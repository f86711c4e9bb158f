//! Quiver storage collaborators
//!
//! The query core performs no storage I/O itself. Everything it needs from
//! the surrounding database is specified here as traits: executing leaf
//! document sub-queries, point document lookup, index lookup/creation and
//! staleness notification, and read-transaction discipline.
//!
//! In-memory implementations are provided for tests and embedded use.

pub mod memory;
pub mod traits;

pub use memory::{InMemoryDocumentStore, InMemoryIndex, InMemoryIndexStore, InMemoryQueryContext, InMemoryQueryExecutor};
pub use traits::{AutoIndexMatch, DocumentStore, Index, IndexStore, QueryContext, SubQueryExecutor};

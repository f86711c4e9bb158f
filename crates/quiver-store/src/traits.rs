//! Collaborator traits consumed by the query core

use async_trait::async_trait;
use futures::future::BoxFuture;
use quiver_core::{Document, Etag, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Runs a leaf document sub-query and returns its matching documents.
///
/// The returned set is materialized once per plan initialization; the core
/// never re-runs a sub-query for the same step instance.
#[async_trait]
pub trait SubQueryExecutor: Send + Sync {
    /// Execute `query` with the given parameters, optionally pinned to a
    /// result-set etag captured at plan start.
    async fn run_query(
        &self,
        query: &str,
        parameters: &Map<String, Value>,
        result_etag: Option<Etag>,
    ) -> Result<Vec<Arc<Document>>>;
}

/// Point access to stored documents, used by collection-destination steps
/// to resolve edge targets without materializing a whole collection.
pub trait DocumentStore: Send + Sync {
    /// Load a document by id, if it exists
    fn load(&self, id: &str) -> Option<Arc<Document>>;

    /// Returns true if the document with `id` belongs to `collection`
    fn in_collection(&self, id: &str, collection: &str) -> bool;
}

/// A handle to one index
pub trait Index: Send + Sync {
    /// The index name
    fn name(&self) -> &str;

    /// Returns true if the index has not yet caught up to `cutoff_etag`
    fn is_stale(&self, cutoff_etag: Etag) -> bool;

    /// A future that completes when the next indexing batch finishes.
    ///
    /// Must be captured *before* checking staleness so a batch completing
    /// between the check and the await is not missed. The caller must not
    /// hold a read transaction while awaiting it.
    fn indexing_batch_awaiter(&self) -> BoxFuture<'static, ()>;
}

/// Result of asking the index store to back a query with an auto-index
pub struct AutoIndexMatch {
    /// The matched or freshly created index
    pub index: Arc<dyn Index>,

    /// True if the index was created by this call; only then does the plan
    /// wait for it to become non-stale
    pub created: bool,
}

/// Lookup and on-demand creation of indexes
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Look up an index by name
    fn get_index(&self, name: &str) -> Result<Arc<dyn Index>>;

    /// Find an index able to answer `query`, synthesizing an auto-index if
    /// none exists. The caller's read transaction must be closed.
    async fn create_auto_index_if_needed(&self, query: &str) -> Result<AutoIndexMatch>;
}

/// Read-transaction discipline for one query.
///
/// Staleness waiting requires the transaction to be closed while awaiting
/// an indexing batch and reopened before the next poll.
pub trait QueryContext: Send + Sync {
    /// Open a read transaction; no-op if one is already open
    fn open_read_transaction(&self);

    /// Close the current read transaction, if any
    fn close_transaction(&self);

    /// Returns true if a read transaction is currently open
    fn has_open_transaction(&self) -> bool;

    /// The last write sequence number visible to this context
    fn read_last_etag(&self) -> Etag;
}

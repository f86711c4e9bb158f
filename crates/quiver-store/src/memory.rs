//! In-memory collaborator implementations
//!
//! Backing for tests and embedded use: canned sub-query results, a document
//! map with collection membership, and indexes whose staleness and batch
//! completion can be scripted.

use crate::traits::{
    AutoIndexMatch, DocumentStore, Index, IndexStore, QueryContext, SubQueryExecutor,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use quiver_core::{Document, Error, Etag, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::debug;

/// Sub-query executor returning canned results per query string
#[derive(Default)]
pub struct InMemoryQueryExecutor {
    results: RwLock<HashMap<String, Vec<Arc<Document>>>>,
    run_counts: RwLock<HashMap<String, usize>>,
}

impl InMemoryQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the result set for a query string
    pub fn register<I>(&self, query: &str, documents: I)
    where
        I: IntoIterator<Item = Document>,
    {
        self.results.write().unwrap().insert(
            query.to_string(),
            documents.into_iter().map(Arc::new).collect(),
        );
    }

    /// How many times `query` has been executed
    pub fn run_count(&self, query: &str) -> usize {
        self.run_counts
            .read()
            .unwrap()
            .get(query)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SubQueryExecutor for InMemoryQueryExecutor {
    async fn run_query(
        &self,
        query: &str,
        _parameters: &Map<String, Value>,
        _result_etag: Option<Etag>,
    ) -> Result<Vec<Arc<Document>>> {
        *self
            .run_counts
            .write()
            .unwrap()
            .entry(query.to_string())
            .or_insert(0) += 1;
        Ok(self
            .results
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

/// Document map with collection membership
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, (Arc<Document>, String)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document under a collection
    pub fn put(&self, collection: &str, document: Document) -> Arc<Document> {
        let doc = Arc::new(document);
        self.documents
            .write()
            .unwrap()
            .insert(doc.id.clone(), (doc.clone(), collection.to_string()));
        doc
    }

    /// All documents of one collection, in insertion-independent order
    pub fn collection(&self, collection: &str) -> Vec<Arc<Document>> {
        self.documents
            .read()
            .unwrap()
            .values()
            .filter(|(_, c)| c == collection)
            .map(|(d, _)| d.clone())
            .collect()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn load(&self, id: &str) -> Option<Arc<Document>> {
        self.documents.read().unwrap().get(id).map(|(d, _)| d.clone())
    }

    fn in_collection(&self, id: &str, collection: &str) -> bool {
        self.documents
            .read()
            .unwrap()
            .get(id)
            .is_some_and(|(_, c)| c == collection)
    }
}

struct IndexInner {
    name: String,
    indexed_etag: AtomicU64,
    pending_batches: Mutex<VecDeque<Etag>>,
    batch_permits: Semaphore,
    context: Option<Arc<InMemoryQueryContext>>,
    observed_open_tx_during_wait: AtomicBool,
}

/// An index whose staleness and batch completion are scripted by tests.
///
/// `schedule_batch` queues an indexing batch: the next awaited
/// `indexing_batch_awaiter` future completes and advances the indexed etag
/// to the queued value.
pub struct InMemoryIndex {
    inner: Arc<IndexInner>,
}

impl InMemoryIndex {
    pub fn new<S: Into<String>>(name: S, indexed_etag: Etag) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                name: name.into(),
                indexed_etag: AtomicU64::new(indexed_etag),
                pending_batches: Mutex::new(VecDeque::new()),
                batch_permits: Semaphore::new(0),
                context: None,
                observed_open_tx_during_wait: AtomicBool::new(false),
            }),
        }
    }

    /// Like `new`, but records whether any awaiter ran while `context`
    /// still held an open read transaction (a contract violation)
    pub fn with_context<S: Into<String>>(
        name: S,
        indexed_etag: Etag,
        context: Arc<InMemoryQueryContext>,
    ) -> Self {
        Self {
            inner: Arc::new(IndexInner {
                name: name.into(),
                indexed_etag: AtomicU64::new(indexed_etag),
                pending_batches: Mutex::new(VecDeque::new()),
                batch_permits: Semaphore::new(0),
                context: Some(context),
                observed_open_tx_during_wait: AtomicBool::new(false),
            }),
        }
    }

    /// Queue an indexing batch that advances the index to `etag`
    pub fn schedule_batch(&self, etag: Etag) {
        self.inner.pending_batches.lock().unwrap().push_back(etag);
        self.inner.batch_permits.add_permits(1);
    }

    /// True if an awaiter observed an open read transaction while waiting
    pub fn observed_open_tx_during_wait(&self) -> bool {
        self.inner.observed_open_tx_during_wait.load(Ordering::SeqCst)
    }

    pub fn indexed_etag(&self) -> Etag {
        self.inner.indexed_etag.load(Ordering::SeqCst)
    }
}

impl Index for InMemoryIndex {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_stale(&self, cutoff_etag: Etag) -> bool {
        self.inner.indexed_etag.load(Ordering::SeqCst) < cutoff_etag
    }

    fn indexing_batch_awaiter(&self) -> BoxFuture<'static, ()> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(context) = &inner.context {
                if context.has_open_transaction() {
                    inner
                        .observed_open_tx_during_wait
                        .store(true, Ordering::SeqCst);
                }
            }
            // Closed only on drop of the store; acquire cannot fail here
            if let Ok(permit) = inner.batch_permits.acquire().await {
                permit.forget();
                if let Some(etag) = inner.pending_batches.lock().unwrap().pop_front() {
                    debug!(index = %inner.name, etag, "indexing batch completed");
                    inner.indexed_etag.store(etag, Ordering::SeqCst);
                }
            }
        })
    }
}

/// Index store with scriptable auto-index creation
#[derive(Default)]
pub struct InMemoryIndexStore {
    indexes: RwLock<HashMap<String, Arc<InMemoryIndex>>>,
    pending_auto: RwLock<HashMap<String, Arc<InMemoryIndex>>>,
    auto_created: RwLock<Vec<String>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing index by name
    pub fn add_index(&self, index: InMemoryIndex) -> Arc<InMemoryIndex> {
        let index = Arc::new(index);
        self.indexes
            .write()
            .unwrap()
            .insert(index.name().to_string(), index.clone());
        index
    }

    /// Script the index that auto-creation for `query` will produce
    pub fn stage_auto_index(&self, query: &str, index: InMemoryIndex) -> Arc<InMemoryIndex> {
        let index = Arc::new(index);
        self.pending_auto
            .write()
            .unwrap()
            .insert(query.to_string(), index.clone());
        index
    }

    /// Names of the auto-indexes created so far, in creation order
    pub fn auto_created(&self) -> Vec<String> {
        self.auto_created.read().unwrap().clone()
    }

    fn auto_index_name(query: &str) -> String {
        format!("Auto/{query}")
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    fn get_index(&self, name: &str) -> Result<Arc<dyn Index>> {
        self.indexes
            .read()
            .unwrap()
            .get(name)
            .map(|i| i.clone() as Arc<dyn Index>)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    async fn create_auto_index_if_needed(&self, query: &str) -> Result<AutoIndexMatch> {
        let name = Self::auto_index_name(query);
        if let Some(existing) = self.indexes.read().unwrap().get(&name) {
            return Ok(AutoIndexMatch {
                index: existing.clone(),
                created: false,
            });
        }

        let staged = self.pending_auto.write().unwrap().remove(query);
        let index = match staged {
            Some(index) => index,
            None => Arc::new(InMemoryIndex::new(name.clone(), 0)),
        };
        self.indexes
            .write()
            .unwrap()
            .insert(name.clone(), index.clone());
        self.auto_created.write().unwrap().push(name);
        Ok(AutoIndexMatch {
            index,
            created: true,
        })
    }
}

/// Read-transaction bookkeeping with call counters
#[derive(Default)]
pub struct InMemoryQueryContext {
    open: AtomicBool,
    last_etag: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl InMemoryQueryContext {
    pub fn new(last_etag: Etag) -> Self {
        Self {
            open: AtomicBool::new(false),
            last_etag: AtomicU64::new(last_etag),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_last_etag(&self, etag: Etag) {
        self.last_etag.store(etag, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl QueryContext for InMemoryQueryContext {
    fn open_read_transaction(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close_transaction(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn has_open_transaction(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn read_last_etag(&self) -> Etag {
        self.last_etag.load(Ordering::SeqCst)
    }
}

//! Quiver - Graph-pattern query engine for document databases
//!
//! This is the main library crate that re-exports all Quiver components.

pub use quiver_core as core;
pub use quiver_query as query;
pub use quiver_store as store;

// Re-export commonly used types
pub use quiver_core::{
    extract_referenced_ids, traverse, BoundValue, CancellationToken, Document, Error, Etag,
    Result,
};

pub use quiver_query::{
    EdgeDefinition, FilterExpression, GraphDebugInfo, GraphQuery, GraphQueryPlan, GraphQueryStep,
    Match, PathElement, PatternExpression, PatternPath, RecursiveKind, RecursiveOptions,
    Uniqueness, WithQuery,
};

pub use quiver_store::{
    DocumentStore, Index, IndexStore, InMemoryDocumentStore, InMemoryIndex, InMemoryIndexStore,
    InMemoryQueryContext, InMemoryQueryExecutor, QueryContext, SubQueryExecutor,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_end_to_end_through_public_surface() {
        let executor = Arc::new(InMemoryQueryExecutor::new());
        executor.register(
            "from Users",
            [
                Document::new("users/1", json!({"Follows": ["users/2"]})),
                Document::new("users/2", json!({"Follows": ["users/1"]})),
            ],
        );

        let mut with_document_queries = HashMap::new();
        with_document_queries.insert("a".to_string(), WithQuery::new("from Users"));
        with_document_queries.insert("b".to_string(), WithQuery::new("from Users"));
        let mut with_edge_predicates = HashMap::new();
        with_edge_predicates.insert(
            "f".to_string(),
            Arc::new(EdgeDefinition::new("f", "Follows")),
        );
        let query = GraphQuery {
            match_clause: PatternExpression::Path(PatternPath::new(vec![
                PathElement::node("a"),
                PathElement::edge("f"),
                PathElement::node("b"),
            ])),
            with_document_queries,
            with_edge_predicates,
        };

        let mut plan = GraphQueryPlan::new(
            query,
            executor,
            Arc::new(InMemoryIndexStore::new()),
            Arc::new(InMemoryQueryContext::new(0)),
        );
        plan.build_query_plan().unwrap();
        plan.create_auto_indexes_and_wait_if_necessary()
            .await
            .unwrap();
        plan.initialize().await.unwrap();

        let matches = plan.execute().unwrap();
        assert_eq!(matches.len(), 2);
        let debug_info = plan.analyze(&matches).unwrap();
        assert_eq!(debug_info.edges.len(), 2);
    }
}

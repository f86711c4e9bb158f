//! Single-hop edge matching
//!
//! `SingleEdgeMatcher` turns one left-hand match into zero or more combined
//! matches by reading the edge field off the bound document, filtering and
//! projecting the payloads, extracting the referenced target ids, and
//! joining each id against the right-hand step. `EdgeQueryStep` drives the
//! matcher over every left row; `SingleEdgeStep` runs the same hop one row
//! at a time for recursive traversal.

use crate::ast::EdgeDefinition;
use crate::binding::Match;
use crate::collection::CollectionDestinationStep;
use crate::step::{self, GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{extract_referenced_ids, traverse, BoundValue, CancellationToken, Error, Result};
use quiver_store::DocumentStore;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Matches one edge definition against one left-hand row at a time.
///
/// Owns its result buffer; the owning step borrows the matcher for the
/// duration of one initialization or hop and drains it afterwards.
pub struct SingleEdgeMatcher {
    pub edge: Arc<EdgeDefinition>,
    pub parameters: Map<String, Value>,
    pub identity_part_separator: char,
    pub results: Vec<Match>,
}

impl SingleEdgeMatcher {
    pub fn new(
        edge: Arc<EdgeDefinition>,
        parameters: Map<String, Value>,
        identity_part_separator: char,
    ) -> Self {
        Self {
            edge,
            parameters,
            identity_part_separator,
            results: Vec::new(),
        }
    }

    /// Run the hop for one left row. `alias` names the binding holding the
    /// source document; `right` is the destination step to join against,
    /// if the edge has one.
    pub fn single_match(
        &mut self,
        left: &Match,
        alias: &str,
        right: Option<&dyn GraphQueryStep>,
    ) -> Result<()> {
        let Some(doc) = left.document(alias) else {
            return Ok(());
        };
        let doc = doc.clone();

        let Some(field_value) = traverse(&doc.data, &self.edge.path) else {
            return Ok(());
        };

        if !self.edge.filters_payload() {
            // the raw field value itself is the edge payload
            return self.add_edge_after_filtering(left, &field_value, "", &field_value, right);
        }

        match &field_value {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(_) => {
                            self.matched_payload(left, item, &field_value, right)?
                        }
                        Value::String(s) => self.string_item(left, s, &field_value, right)?,
                        _ => return Err(self.missing_projection()),
                    }
                }
                Ok(())
            }
            Value::Object(_) => self.matched_payload(left, &field_value, &field_value, right),
            _ => Err(self.missing_projection()),
        }
    }

    fn matched_payload(
        &mut self,
        left: &Match,
        payload: &Value,
        field_value: &Value,
        right: Option<&dyn GraphQueryStep>,
    ) -> Result<()> {
        let Some(project) = self.edge.project.clone() else {
            return Err(self.missing_projection());
        };
        if let Some(filter) = &self.edge.where_filter {
            if !filter.matches(payload, &self.parameters) {
                return Ok(());
            }
        }
        self.add_edge_after_filtering(left, payload, &project, field_value, right)
    }

    // A bare string in an edge array stands for the target id itself: WHERE
    // sees a synthesized single-field object, and the emitted payload is
    // re-synthesized under the projected field name.
    fn string_item(
        &mut self,
        left: &Match,
        item: &str,
        field_value: &Value,
        right: Option<&dyn GraphQueryStep>,
    ) -> Result<()> {
        if let Some(filter) = &self.edge.where_filter {
            let mut for_where = Map::new();
            for_where.insert(self.edge.path.clone(), Value::String(item.to_string()));
            if !self.edge.alias.is_empty() {
                for_where.insert(self.edge.alias.clone(), Value::String(item.to_string()));
            }
            if !filter.matches(&Value::Object(for_where), &self.parameters) {
                return Ok(());
            }
        }

        let emit_field = self
            .edge
            .project
            .clone()
            .unwrap_or_else(|| self.edge.path.clone());
        let mut emitted = Map::new();
        emitted.insert(emit_field.clone(), Value::String(item.to_string()));
        self.add_edge_after_filtering(
            left,
            &Value::Object(emitted),
            &emit_field,
            field_value,
            right,
        )
    }

    fn missing_projection(&self) -> Error {
        Error::MissingEdgeProjection {
            edge: self.edge.to_string(),
        }
    }

    fn add_edge_after_filtering(
        &mut self,
        left: &Match,
        payload: &Value,
        extract_path: &str,
        field_value: &Value,
        right: Option<&dyn GraphQueryStep>,
    ) -> Result<()> {
        let ids = extract_referenced_ids(payload, extract_path, self.identity_part_separator);
        if ids.is_empty() {
            return Ok(());
        }
        // candidate id map: later duplicates overwrite earlier ones
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            if seen.insert(id.clone()) {
                candidates.push(id);
            }
        }

        let use_full_object = payload != field_value;
        for id in candidates {
            match right {
                None => self.merge_and_add(left, None, &id, payload, use_full_object),
                Some(right) => {
                    for right_match in right.get_by_id(&id)? {
                        self.merge_and_add(left, Some(&right_match), &id, payload, use_full_object);
                    }
                }
            }
        }
        Ok(())
    }

    fn merge_and_add(
        &mut self,
        left: &Match,
        right: Option<&Match>,
        id: &str,
        payload: &Value,
        use_full_object: bool,
    ) {
        let mut combined = left.clone();
        if let Some(right) = right {
            combined.merge(right);
        }
        if use_full_object {
            combined.set(&self.edge.alias, BoundValue::Json(payload.clone()));
        } else {
            combined.set(&self.edge.alias, BoundValue::Id(id.to_string()));
        }
        self.results.push(combined);
    }

    /// Hand the accumulated results to the owning step
    pub fn drain_results(&mut self) -> Vec<Match> {
        std::mem::take(&mut self.results)
    }
}

/// One edge hop runnable a row at a time; recursion chains these.
pub struct SingleEdgeStep {
    matcher: SingleEdgeMatcher,
    right: Option<Box<dyn GraphQueryStep>>,
}

impl SingleEdgeStep {
    pub fn new(
        edge: Arc<EdgeDefinition>,
        parameters: Map<String, Value>,
        identity_part_separator: char,
        right: Option<Box<dyn GraphQueryStep>>,
    ) -> Self {
        Self {
            matcher: SingleEdgeMatcher::new(edge, parameters, identity_part_separator),
            right,
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        if let Some(right) = &mut self.right {
            right.initialize().await?;
        }
        Ok(())
    }

    pub fn run(&mut self, src: &Match, alias: &str) -> Result<()> {
        self.matcher
            .single_match(src, alias, self.right.as_deref())
    }

    pub fn drain(&mut self) -> Vec<Match> {
        self.matcher.drain_results()
    }

    pub fn edge(&self) -> &Arc<EdgeDefinition> {
        &self.matcher.edge
    }

    /// Alias the hop leaves the traversal standing on
    pub fn output_alias(&self) -> &str {
        match &self.right {
            Some(right) => right.output_alias(),
            None => &self.matcher.edge.alias,
        }
    }

    pub fn add_aliases(&self, out: &mut HashSet<String>) {
        out.insert(self.matcher.edge.alias.clone());
        if let Some(right) = &self.right {
            out.extend(right.all_aliases().iter().cloned());
        }
    }

    pub fn clone_hop(&self) -> SingleEdgeStep {
        SingleEdgeStep {
            matcher: SingleEdgeMatcher::new(
                self.matcher.edge.clone(),
                self.matcher.parameters.clone(),
                self.matcher.identity_part_separator,
            ),
            right: self.right.as_ref().map(|r| r.clone_step()),
        }
    }

    pub fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>) {
        if let Some(right) = &self.right {
            right.gather_leaves(out);
        }
    }

    pub fn rewrite_destinations(
        mut self,
        store: &Arc<dyn DocumentStore>,
        token: &CancellationToken,
    ) -> SingleEdgeStep {
        self.right = self
            .right
            .map(|r| rewrite_edge_destination(r, store, token));
        self
    }
}

/// Replace a whole-collection destination with a direct-lookup step sharing
/// the plan's cancellation token
pub(crate) fn rewrite_edge_destination(
    right: Box<dyn GraphQueryStep>,
    store: &Arc<dyn DocumentStore>,
    token: &CancellationToken,
) -> Box<dyn GraphQueryStep> {
    if let Some(info) = right.as_collection_scan() {
        Box::new(CollectionDestinationStep::new(
            &info.alias,
            &info.collection,
            store.clone(),
            token.clone(),
        ))
    } else {
        right.rewrite_destinations(store)
    }
}

/// Joins a left and right step through one edge definition.
pub struct EdgeQueryStep {
    left: Box<dyn GraphQueryStep>,
    right: Option<Box<dyn GraphQueryStep>>,
    edge: Arc<EdgeDefinition>,
    parameters: Map<String, Value>,
    identity_part_separator: char,
    token: CancellationToken,

    aliases: HashSet<String>,
    output_alias: String,
    results: Vec<Match>,
    cursor: Option<usize>,
}

impl EdgeQueryStep {
    pub fn new(
        left: Box<dyn GraphQueryStep>,
        right: Option<Box<dyn GraphQueryStep>>,
        edge: Arc<EdgeDefinition>,
        parameters: Map<String, Value>,
        identity_part_separator: char,
        token: CancellationToken,
    ) -> Self {
        let mut aliases: HashSet<String> = left.all_aliases().iter().cloned().collect();
        if let Some(right) = &right {
            aliases.extend(right.all_aliases().iter().cloned());
        }
        aliases.insert(edge.alias.clone());
        let output_alias = match &right {
            Some(right) => right.output_alias().to_string(),
            None => edge.alias.clone(),
        };
        Self {
            left,
            right,
            edge,
            parameters,
            identity_part_separator,
            token,
            aliases,
            output_alias,
            results: Vec::new(),
            cursor: None,
        }
    }
}

#[async_trait]
impl GraphQueryStep for EdgeQueryStep {
    async fn initialize(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        self.token.check()?;

        self.left.initialize().await?;
        // AND-join against an empty left is always empty: the right side is
        // never even initialized
        if self.left.is_empty() {
            self.cursor = Some(0);
            return Ok(());
        }

        self.token.check()?;
        if let Some(right) = &mut self.right {
            right.initialize().await?;
        }
        self.cursor = Some(0);
        if self.right.as_ref().is_some_and(|r| r.is_empty()) {
            return Ok(());
        }

        let mut matcher = SingleEdgeMatcher::new(
            self.edge.clone(),
            self.parameters.clone(),
            self.identity_part_separator,
        );
        let alias = self.left.output_alias().to_string();
        while let Some(left_match) = self.left.get_next()? {
            self.token.check()?;
            matcher.single_match(&left_match, &alias, self.right.as_deref())?;
        }
        self.results = matcher.drain_results();
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        self.token.check()?;
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::Internal(
                "get_next called on an uninitialized edge step".to_string(),
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
            "cannot get a match by id from an edge".to_string(),
        ))
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        Box::new(EdgeQueryStep::new(
            self.left.clone_step(),
            self.right.as_ref().map(|r| r.clone_step()),
            self.edge.clone(),
            self.parameters.clone(),
            self.identity_part_separator,
            self.token.clone(),
        ))
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        self.left.analyze(m, debug);
        if let Some(right) = &self.right {
            right.analyze(m, debug);
        }

        let from = m
            .get(self.left.output_alias())
            .and_then(|v| v.id().map(str::to_string));
        let to = m.get(&self.edge.alias).and_then(|v| {
            step::edge_target_id(v, self.edge.project.as_deref(), &self.parameters)
        });
        if let (Some(from), Some(to)) = (from, to) {
            debug.add_edge(&self.edge.alias, &from, &to);
        }
    }

    fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>) {
        self.left.gather_leaves(out);
        if let Some(right) = &self.right {
            right.gather_leaves(out);
        }
    }

    fn rewrite_destinations(
        mut self: Box<Self>,
        store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        let token = self.token.clone();
        self.left = self.left.rewrite_destinations(store);
        self.right = self
            .right
            .take()
            .map(|right| rewrite_edge_destination(right, store, &token));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterExpression;
    use crate::testing::{match_with_doc, StubStep};
    use quiver_core::Document;
    use serde_json::json;

    fn matcher(edge: EdgeDefinition) -> SingleEdgeMatcher {
        SingleEdgeMatcher::new(Arc::new(edge), Map::new(), '/')
    }

    #[test]
    fn test_raw_field_binds_bare_ids() {
        let mut m = matcher(EdgeDefinition::new("l", "Likes"));
        let left = match_with_doc("a", Document::new("users/1", json!({"Likes": ["users/2", "users/3"]})));

        m.single_match(&left, "a", None).unwrap();
        let results = m.drain_results();
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(matches!(r.get("l"), Some(BoundValue::Id(_))));
        }
    }

    #[test]
    fn test_missing_field_yields_nothing() {
        let mut m = matcher(EdgeDefinition::new("l", "Likes"));
        let left = match_with_doc("a", Document::new("users/1", json!({"Name": "Alice"})));

        m.single_match(&left, "a", None).unwrap();
        assert!(m.drain_results().is_empty());
    }

    #[test]
    fn test_projected_object_items_filtered_and_bound_as_payload() {
        let edge = EdgeDefinition::new("l", "Rated")
            .with_project("Movie")
            .with_filter(FilterExpression::compare(
                "Score",
                crate::filter::ComparisonOp::Gte,
                crate::filter::FilterValue::Literal(json!(4)),
            ));
        let mut m = matcher(edge);
        let left = match_with_doc(
            "a",
            Document::new(
                "users/1",
                json!({"Rated": [
                    {"Movie": "movies/1", "Score": 5},
                    {"Movie": "movies/2", "Score": 2}
                ]}),
            ),
        );

        m.single_match(&left, "a", None).unwrap();
        let results = m.drain_results();
        assert_eq!(results.len(), 1);
        match results[0].get("l") {
            Some(BoundValue::Json(payload)) => {
                assert_eq!(payload["Movie"], json!("movies/1"));
            }
            other => panic!("expected payload binding, got {other:?}"),
        }
    }

    #[test]
    fn test_mixed_strings_and_objects_with_project() {
        let edge = EdgeDefinition::new("l", "Likes")
            .with_project("User")
            .with_filter(FilterExpression::Not(Box::new(FilterExpression::eq(
                "Likes",
                json!("users/blocked"),
            ))));
        let mut m = matcher(edge);
        let left = match_with_doc(
            "a",
            Document::new(
                "users/1",
                json!({"Likes": ["users/2", {"User": "users/3"}, "users/blocked"]}),
            ),
        );

        m.single_match(&left, "a", None).unwrap();
        let results = m.drain_results();
        // the blocked string fails WHERE on the synthesized object
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_non_string_non_object_item_is_projection_error() {
        let edge = EdgeDefinition::new("l", "Likes").with_project("User");
        let mut m = matcher(edge);
        let left = match_with_doc("a", Document::new("users/1", json!({"Likes": [42]})));

        let err = m.single_match(&left, "a", None).unwrap_err();
        assert!(matches!(err, Error::MissingEdgeProjection { .. }));
    }

    #[test]
    fn test_object_item_without_project_is_projection_error() {
        let edge = EdgeDefinition::new("l", "Likes")
            .with_filter(FilterExpression::eq("Kind", json!("friend")));
        let mut m = matcher(edge);
        let left = match_with_doc(
            "a",
            Document::new("users/1", json!({"Likes": [{"User": "users/2"}]})),
        );

        let err = m.single_match(&left, "a", None).unwrap_err();
        assert!(matches!(err, Error::MissingEdgeProjection { .. }));
    }

    #[test]
    fn test_join_against_right_step() {
        let right = StubStep::with_documents(
            "b",
            [
                Document::new("users/2", json!({"Name": "Bob"})),
                Document::new("users/4", json!({"Name": "Dana"})),
            ],
        );
        let mut m = matcher(EdgeDefinition::new("l", "Likes"));
        let left = match_with_doc(
            "a",
            Document::new("users/1", json!({"Likes": ["users/2", "users/3"]})),
        );

        // users/3 has no right-hand counterpart and is dropped by the join
        m.single_match(&left, "a", Some(&right)).unwrap();
        let results = m.drain_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("b").and_then(|v| v.id()), Some("users/2"));
        assert_eq!(results[0].get("a").and_then(|v| v.id()), Some("users/1"));
    }

    #[tokio::test]
    async fn test_left_empty_short_circuits_right_initialization() {
        let left = StubStep::empty("a");
        let right = StubStep::with_documents("b", [Document::new("users/2", json!({}))]);
        let right_inits = right.init_count_handle();

        let mut step = EdgeQueryStep::new(
            Box::new(left),
            Some(Box::new(right)),
            Arc::new(EdgeDefinition::new("l", "Likes")),
            Map::new(),
            '/',
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        assert!(step.is_empty());
        assert_eq!(right_inits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_edge_step_joins_all_left_rows() {
        let left = StubStep::with_documents(
            "a",
            [
                Document::new("users/1", json!({"Likes": ["users/3"]})),
                Document::new("users/2", json!({"Likes": ["users/3", "users/1"]})),
            ],
        );
        let right = StubStep::with_documents(
            "b",
            [
                Document::new("users/1", json!({})),
                Document::new("users/3", json!({})),
            ],
        );

        let mut step = EdgeQueryStep::new(
            Box::new(left),
            Some(Box::new(right)),
            Arc::new(EdgeDefinition::new("l", "Likes")),
            Map::new(),
            '/',
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        let mut count = 0;
        while let Some(m) = step.get_next().unwrap() {
            assert!(m.get("a").is_some() && m.get("b").is_some() && m.get("l").is_some());
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_get_by_id_unsupported_on_edge() {
        let step = EdgeQueryStep::new(
            Box::new(StubStep::empty("a")),
            Some(Box::new(StubStep::empty("b"))),
            Arc::new(EdgeDefinition::new("l", "Likes")),
            Map::new(),
            '/',
            CancellationToken::new(),
        );
        assert!(matches!(
            step.get_by_id("users/1"),
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_rewritten_destination_shares_the_plan_token() {
        use crate::ast::WithQuery;
        use crate::leaf::DocumentQueryStep;
        use quiver_store::{InMemoryDocumentStore, InMemoryQueryExecutor};

        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let token = CancellationToken::new();
        let scan: Box<dyn GraphQueryStep> = Box::new(DocumentQueryStep::new(
            "b",
            WithQuery::new("from Users"),
            Map::new(),
            Arc::new(InMemoryQueryExecutor::new()),
            None,
            token.clone(),
        ));

        let mut rewritten = rewrite_edge_destination(scan, &store, &token);
        rewritten.initialize().await.unwrap();

        // the rewritten lookup step must keep honoring the shared token
        token.cancel();
        assert!(matches!(rewritten.get_next(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_initialize_idempotent() {
        let left = StubStep::with_documents("a", [Document::new("users/1", json!({"Likes": []}))]);
        let left_inits = left.init_count_handle();

        let mut step = EdgeQueryStep::new(
            Box::new(left),
            Some(Box::new(StubStep::with_documents(
                "b",
                [Document::new("users/2", json!({}))],
            ))),
            Arc::new(EdgeDefinition::new("l", "Likes")),
            Map::new(),
            '/',
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();
        step.initialize().await.unwrap();
        assert_eq!(left_inits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}

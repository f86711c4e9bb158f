//! Test doubles shared by the step tests

use crate::binding::Match;
use crate::step::{GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{BoundValue, Document, Result};
use quiver_store::DocumentStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A match binding one document under one alias
pub(crate) fn match_with_doc(alias: &str, doc: Document) -> Match {
    let mut m = Match::new();
    m.set(alias, BoundValue::from(doc));
    m
}

/// Pre-materialized step that counts `initialize` calls
pub(crate) struct StubStep {
    alias: String,
    aliases: HashSet<String>,
    matches: Vec<Match>,
    by_id: HashMap<String, Vec<usize>>,
    cursor: Option<usize>,
    init_count: Arc<AtomicUsize>,
}

impl StubStep {
    pub(crate) fn with_documents<I>(alias: &str, documents: I) -> Self
    where
        I: IntoIterator<Item = Document>,
    {
        let mut matches = Vec::new();
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for doc in documents {
            by_id.entry(doc.id.clone()).or_default().push(matches.len());
            matches.push(match_with_doc(alias, doc));
        }
        let mut aliases = HashSet::new();
        aliases.insert(alias.to_string());
        Self {
            alias: alias.to_string(),
            aliases,
            matches,
            by_id,
            cursor: None,
            init_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_matches<I>(alias: &str, matches: I) -> Self
    where
        I: IntoIterator<Item = Match>,
    {
        let matches: Vec<Match> = matches.into_iter().collect();
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (row, m) in matches.iter().enumerate() {
            if let Some(id) = m.get(alias).and_then(|v| v.id()) {
                by_id.entry(id.to_string()).or_default().push(row);
            }
        }
        let mut aliases = HashSet::new();
        for m in &matches {
            aliases.extend(m.aliases().map(str::to_string));
        }
        aliases.insert(alias.to_string());
        Self {
            alias: alias.to_string(),
            aliases,
            matches,
            by_id,
            cursor: None,
            init_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn empty(alias: &str) -> Self {
        Self::with_documents(alias, [])
    }

    pub(crate) fn init_count_handle(&self) -> Arc<AtomicUsize> {
        self.init_count.clone()
    }
}

#[async_trait]
impl GraphQueryStep for StubStep {
    async fn initialize(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            self.cursor = Some(0);
        }
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        let cursor = self.cursor.get_or_insert(0);
        if *cursor >= self.matches.len() {
            return Ok(None);
        }
        let m = self.matches[*cursor].clone();
        *cursor += 1;
        Ok(Some(m))
    }

    fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    fn all_aliases(&self) -> &HashSet<String> {
        &self.aliases
    }

    fn output_alias(&self) -> &str {
        &self.alias
    }

    fn get_by_id(&self, id: &str) -> Result<Vec<Match>> {
        Ok(self
            .by_id
            .get(id)
            .map(|rows| rows.iter().map(|&i| self.matches[i].clone()).collect())
            .unwrap_or_default())
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        Box::new(Self {
            alias: self.alias.clone(),
            aliases: self.aliases.clone(),
            matches: self.matches.clone(),
            by_id: self.by_id.clone(),
            cursor: None,
            init_count: self.init_count.clone(),
        })
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        if let Some(id) = m.get(&self.alias).and_then(|v| v.id()) {
            debug.add_node(&self.alias, id);
        }
    }

    fn gather_leaves(&self, _out: &mut Vec<LeafQueryInfo>) {}

    fn rewrite_destinations(
        self: Box<Self>,
        _store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        self
    }
}

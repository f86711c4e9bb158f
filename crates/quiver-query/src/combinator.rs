//! Set combination of sub-plans (AND, OR, AND NOT)
//!
//! Two sub-plans joined by a binary pattern operator are combined by one
//! generic step parameterized over a set policy. Matches from either side
//! relate through their join key: the serialized bindings of the aliases
//! both subtrees have in common.

use crate::binding::Match;
use crate::step::{GraphDebugInfo, GraphQueryStep, LeafQueryInfo};
use async_trait::async_trait;
use quiver_core::{CancellationToken, Error, Result};
use quiver_store::DocumentStore;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// One set policy: its short-circuit rules plus how the two drained sides
/// are combined
pub trait SetOp: Send + Sync + 'static {
    /// When true, an empty left side settles the result without ever
    /// initializing the right side
    const RETURN_EMPTY_IF_LEFT_EMPTY: bool;

    /// When true, an empty right side settles the result without combining
    const RETURN_EMPTY_IF_RIGHT_EMPTY: bool;

    fn combine(
        left: Vec<Match>,
        right: Vec<Match>,
        join_aliases: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<Match>>;
}

/// AND: inner join on the shared aliases, merging each joined pair
pub struct Intersection;

/// OR: every match from both sides
pub struct Union;

/// AND NOT: left matches whose join key never occurs on the right
pub struct Except;

impl SetOp for Intersection {
    const RETURN_EMPTY_IF_LEFT_EMPTY: bool = true;
    const RETURN_EMPTY_IF_RIGHT_EMPTY: bool = true;

    fn combine(
        left: Vec<Match>,
        right: Vec<Match>,
        join_aliases: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<Match>> {
        let mut table: HashMap<String, Vec<Match>> = HashMap::new();
        for m in right {
            table.entry(m.join_key(join_aliases)).or_default().push(m);
        }

        let mut out = Vec::new();
        for l in left {
            token.check()?;
            if let Some(partners) = table.get(&l.join_key(join_aliases)) {
                for r in partners {
                    let mut joined = l.clone();
                    joined.merge(r);
                    out.push(joined);
                }
            }
        }
        Ok(out)
    }
}

impl SetOp for Union {
    const RETURN_EMPTY_IF_LEFT_EMPTY: bool = false;
    const RETURN_EMPTY_IF_RIGHT_EMPTY: bool = false;

    fn combine(
        mut left: Vec<Match>,
        right: Vec<Match>,
        _join_aliases: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<Match>> {
        token.check()?;
        left.extend(right);
        Ok(left)
    }
}

impl SetOp for Except {
    const RETURN_EMPTY_IF_LEFT_EMPTY: bool = true;
    // an empty right side excludes nothing
    const RETURN_EMPTY_IF_RIGHT_EMPTY: bool = false;

    fn combine(
        left: Vec<Match>,
        right: Vec<Match>,
        join_aliases: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<Match>> {
        let excluded: HashSet<String> = right
            .into_iter()
            .map(|m| m.join_key(join_aliases))
            .collect();

        let mut out = Vec::new();
        for l in left {
            token.check()?;
            if !excluded.contains(&l.join_key(join_aliases)) {
                out.push(l);
            }
        }
        Ok(out)
    }
}

pub struct IntersectionQueryStep<O: SetOp> {
    left: Box<dyn GraphQueryStep>,
    right: Box<dyn GraphQueryStep>,
    token: CancellationToken,

    aliases: HashSet<String>,
    join_aliases: Vec<String>,
    results: Vec<Match>,
    cursor: Option<usize>,
    _op: PhantomData<O>,
}

impl<O: SetOp> IntersectionQueryStep<O> {
    pub fn new(
        left: Box<dyn GraphQueryStep>,
        right: Box<dyn GraphQueryStep>,
        token: CancellationToken,
    ) -> Self {
        let left_aliases = left.all_aliases();
        let right_aliases = right.all_aliases();
        let mut join_aliases: Vec<String> = left_aliases
            .intersection(right_aliases)
            .cloned()
            .collect();
        join_aliases.sort();
        let aliases = left_aliases.union(right_aliases).cloned().collect();
        Self {
            left,
            right,
            token,
            aliases,
            join_aliases,
            results: Vec::new(),
            cursor: None,
            _op: PhantomData,
        }
    }

    pub fn join_aliases(&self) -> &[String] {
        &self.join_aliases
    }

    fn drain(step: &mut dyn GraphQueryStep) -> Result<Vec<Match>> {
        let mut out = Vec::new();
        while let Some(m) = step.get_next()? {
            out.push(m);
        }
        Ok(out)
    }
}

#[async_trait]
impl<O: SetOp> GraphQueryStep for IntersectionQueryStep<O> {
    async fn initialize(&mut self) -> Result<()> {
        if self.cursor.is_some() {
            return Ok(());
        }
        self.token.check()?;

        self.left.initialize().await?;
        if O::RETURN_EMPTY_IF_LEFT_EMPTY && self.left.is_empty() {
            debug!("left side empty, skipping right side");
            self.cursor = Some(0);
            return Ok(());
        }

        self.right.initialize().await?;
        self.cursor = Some(0);
        if O::RETURN_EMPTY_IF_RIGHT_EMPTY && self.right.is_empty() {
            debug!("right side empty, result settled");
            return Ok(());
        }

        let left = Self::drain(self.left.as_mut())?;
        let right = Self::drain(self.right.as_mut())?;
        self.results = O::combine(left, right, &self.join_aliases, &self.token)?;
        Ok(())
    }

    fn get_next(&mut self) -> Result<Option<Match>> {
        self.token.check()?;
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(Error::Internal(
                "get_next called on an uninitialized set combinator".to_string(),
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
        self.right.output_alias()
    }

    fn get_by_id(&self, _id: &str) -> Result<Vec<Match>> {
        Err(Error::Unsupported(
            "cannot get a match by id from a set combinator".to_string(),
        ))
    }

    fn clone_step(&self) -> Box<dyn GraphQueryStep> {
        Box::new(IntersectionQueryStep::<O>::new(
            self.left.clone_step(),
            self.right.clone_step(),
            self.token.clone(),
        ))
    }

    fn analyze(&self, m: &Match, debug: &mut GraphDebugInfo) {
        self.left.analyze(m, debug);
        self.right.analyze(m, debug);
    }

    fn gather_leaves(&self, out: &mut Vec<LeafQueryInfo>) {
        self.left.gather_leaves(out);
        self.right.gather_leaves(out);
    }

    fn rewrite_destinations(
        mut self: Box<Self>,
        store: &Arc<dyn DocumentStore>,
    ) -> Box<dyn GraphQueryStep> {
        self.left = self.left.rewrite_destinations(store);
        self.right = self.right.rewrite_destinations(store);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{match_with_doc, StubStep};
    use quiver_core::{BoundValue, Document};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn doc(id: &str) -> Document {
        Document::new(id, json!({}))
    }

    fn row(pairs: &[(&str, &str)]) -> Match {
        let mut m = Match::new();
        for (alias, id) in pairs {
            m.set(*alias, BoundValue::from(doc(id)));
        }
        m
    }

    #[tokio::test]
    async fn test_intersection_joins_on_shared_aliases() {
        let left = StubStep::with_matches(
            "b",
            [
                row(&[("a", "users/1"), ("b", "dogs/1")]),
                row(&[("a", "users/2"), ("b", "dogs/2")]),
            ],
        );
        let right = StubStep::with_matches(
            "c",
            [
                row(&[("b", "dogs/1"), ("c", "users/3")]),
                row(&[("b", "dogs/9"), ("c", "users/4")]),
            ],
        );
        let mut step = IntersectionQueryStep::<Intersection>::new(
            Box::new(left),
            Box::new(right),
            CancellationToken::new(),
        );
        assert_eq!(step.join_aliases(), ["b"]);
        step.initialize().await.unwrap();

        let joined = step.get_next().unwrap().unwrap();
        assert_eq!(joined.get("a").and_then(|v| v.id()), Some("users/1"));
        assert_eq!(joined.get("b").and_then(|v| v.id()), Some("dogs/1"));
        assert_eq!(joined.get("c").and_then(|v| v.id()), Some("users/3"));
        assert!(step.get_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_intersection_skips_right_when_left_is_empty() {
        let right = StubStep::with_documents("b", [doc("users/1")]);
        let right_inits = right.init_count_handle();
        let mut step = IntersectionQueryStep::<Intersection>::new(
            Box::new(StubStep::empty("a")),
            Box::new(right),
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        assert!(step.is_empty());
        assert_eq!(right_inits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_except_removes_matching_keys() {
        let left = StubStep::with_matches(
            "a",
            [
                row(&[("a", "users/1")]),
                row(&[("a", "users/2")]),
                row(&[("a", "users/3")]),
            ],
        );
        let right = StubStep::with_matches("a", [row(&[("a", "users/2")])]);
        let mut step = IntersectionQueryStep::<Except>::new(
            Box::new(left),
            Box::new(right),
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        let mut survivors = Vec::new();
        while let Some(m) = step.get_next().unwrap() {
            survivors.push(m.get("a").unwrap().id().unwrap().to_string());
        }
        survivors.sort();
        assert_eq!(survivors, ["users/1", "users/3"]);
    }

    #[tokio::test]
    async fn test_except_with_empty_right_keeps_left() {
        let left = StubStep::with_matches("a", [row(&[("a", "users/1")])]);
        let mut step = IntersectionQueryStep::<Except>::new(
            Box::new(left),
            Box::new(StubStep::empty("a")),
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();
        assert!(!step.is_empty());
        assert!(step.get_next().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_union_keeps_both_sides_and_initializes_right() {
        let right = StubStep::with_documents("b", [doc("users/2")]);
        let right_inits = right.init_count_handle();
        let mut step = IntersectionQueryStep::<Union>::new(
            Box::new(StubStep::empty("a")),
            Box::new(right),
            CancellationToken::new(),
        );
        step.initialize().await.unwrap();

        // an empty left side never settles a union
        assert_eq!(right_inits.load(Ordering::SeqCst), 1);
        let m = step.get_next().unwrap().unwrap();
        assert_eq!(m.get("b").and_then(|v| v.id()), Some("users/2"));
        assert!(step.get_next().unwrap().is_none());
    }
}

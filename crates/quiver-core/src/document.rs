//! Document and binding value types
//!
//! Defines the semi-structured document handed around by the query engine,
//! and the values a pattern alias can be bound to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Monotonic write sequence number; indexes report staleness relative to it
pub type Etag = u64;

/// A document as seen by the query engine: an identifier plus a JSON body.
///
/// The engine never mutates documents; they are shared behind `Arc` between
/// every match that binds them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier
    pub id: String,

    /// Semi-structured body
    pub data: Value,

    /// Write sequence number this document was last touched at
    pub etag: Etag,
}

impl Document {
    /// Create a new document
    pub fn new<S: Into<String>>(id: S, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            etag: 0,
        }
    }

    /// Create a document with an explicit etag
    pub fn with_etag<S: Into<String>>(id: S, data: Value, etag: Etag) -> Self {
        Self {
            id: id.into(),
            data,
            etag,
        }
    }
}

/// A value bound to an alias inside a match.
///
/// Nodes bind whole documents, edges bind either the bare target id or the
/// projected edge payload when it differs from the raw field value.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// A full document, bound by a node alias
    Document(Arc<Document>),

    /// A bare identifier, bound by an edge whose payload adds nothing
    Id(String),

    /// A projected/filtered edge payload
    Json(Value),
}

impl BoundValue {
    /// The identifier this binding denotes, if it denotes one
    pub fn id(&self) -> Option<&str> {
        match self {
            BoundValue::Document(doc) => Some(&doc.id),
            BoundValue::Id(id) => Some(id),
            BoundValue::Json(_) => None,
        }
    }

    /// The underlying document, if this binding carries one
    pub fn as_document(&self) -> Option<&Arc<Document>> {
        match self {
            BoundValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Key used when comparing bindings across two sub-plans: documents
    /// compare by id, everything else structurally.
    pub fn join_key(&self) -> Value {
        match self {
            BoundValue::Document(doc) => Value::String(doc.id.clone()),
            BoundValue::Id(id) => Value::String(id.clone()),
            BoundValue::Json(value) => value.clone(),
        }
    }
}

impl From<Arc<Document>> for BoundValue {
    fn from(doc: Arc<Document>) -> Self {
        BoundValue::Document(doc)
    }
}

impl From<Document> for BoundValue {
    fn from(doc: Document) -> Self {
        BoundValue::Document(Arc::new(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bound_value_id() {
        let doc = Document::new("users/1", json!({"Name": "Alice"}));
        let bound = BoundValue::from(doc);
        assert_eq!(bound.id(), Some("users/1"));
        assert_eq!(BoundValue::Id("users/2".into()).id(), Some("users/2"));
        assert_eq!(BoundValue::Json(json!({"x": 1})).id(), None);
    }

    #[test]
    fn test_join_key_compares_documents_by_id() {
        let a = BoundValue::from(Document::new("users/1", json!({"Name": "Alice"})));
        let b = BoundValue::from(Document::new("users/1", json!({"Name": "Renamed"})));
        assert_eq!(a.join_key(), b.join_key());

        let c = BoundValue::Id("users/1".into());
        assert_eq!(a.join_key(), c.join_key());
    }
}

//! Error types for Quiver
//!
//! Provides the error hierarchy shared by every engine component.

use thiserror::Error;

/// The main error type for Quiver operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Query Plan Errors ==========
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(
        "An expression that selects an edge must have a projection with exactly one field \
         which is of type string. Edge: {edge}"
    )]
    MissingEdgeProjection { edge: String },

    // ========== Execution Errors ==========
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Operation was cancelled")]
    Cancelled,

    // ========== Storage Errors ==========
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    // ========== Index Errors ==========
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index error: {0}")]
    Index(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Quiver operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Invalid-query error with the offending pattern fragment
    pub fn invalid_query<S: Into<String>>(message: S) -> Self {
        Error::InvalidQuery(message.into())
    }

    /// Returns true if this error should surface to the user as a query error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidQuery(_) | Error::MissingEdgeProjection { .. }
        )
    }

    /// Returns true if this error indicates a plan-construction bug rather
    /// than bad user input
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Unsupported(_) | Error::Internal(_))
    }
}

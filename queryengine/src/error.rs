//! Error kinds for the query engine.

/// Errors surfaced by parsing and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Malformed query text; `fragment` is the smallest span the parser could isolate.
    #[error("parse error near {fragment:?}")]
    Parse {
        /// The offending fragment of the original query text.
        fragment: String,
    },

    /// Type mismatch, missing function/resource resolved too late to report as its own variant,
    /// or any other failure during tree evaluation.
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Human-readable description of what went wrong.
        message: String,
    },

    /// A query referenced a resource the data source doesn't know about.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A `QueryFunction` named a function absent from the registry.
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

/// Result alias for fallible `queryengine` operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

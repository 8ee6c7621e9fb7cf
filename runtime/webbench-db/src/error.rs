//! Error types for the store layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Row shape mismatch raised while decoding a result row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} columns, row has {actual}")]
    Width { expected: usize, actual: usize },

    #[error("column {index}: expected {expected}, found {found}")]
    Type {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// Failures reported by a [`Store`](crate::Store) or one of its prepared queries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or is misconfigured.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store rejected a query text at prepare time.
    #[error("prepare failed for {query:?}: {message}")]
    Prepare { query: String, message: String },

    /// A prepared query failed while executing or streaming rows.
    #[error("query error: {0}")]
    Query(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A column or parameter type the value model cannot carry.
    #[error("unsupported type: {0}")]
    Unsupported(String),

    #[error("close failed: {0}")]
    Close(String),
}

//! Error taxonomy for the benchmark worker.
//!
//! Every variant is fatal to a benchmark run: nothing is retried or
//! recovered locally, the error travels up to the top-level loop.

use thiserror::Error;
use webbench_db::{DecodeError, StoreError};

use crate::dispatch::EntityKind;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Store unreachable or misconfigured.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query text rejected by the store.
    #[error("prepare failed for {query:?}: {message}")]
    Prepare { query: String, message: String },

    /// The query kind matches no known entity kind.
    #[error("unknown query type: {0:?}")]
    Classification(String),

    /// The composite query does not split into the shape's slot count.
    #[error("{kind} expects {expected} queries separated by ';', got {actual}")]
    QueryCount {
        kind: EntityKind,
        expected: usize,
        actual: usize,
    },

    /// A sub-query failed at call time.
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Releasing the store's connections failed.
    #[error("teardown failed: {0}")]
    Teardown(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for BenchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(message) => BenchError::Connection(message),
            StoreError::Prepare { query, message } => BenchError::Prepare { query, message },
            StoreError::Decode(err) => BenchError::Decode(err),
            StoreError::Close(message) => BenchError::Teardown(message),
            StoreError::Query(message) => BenchError::QueryExecution(message),
            StoreError::Unsupported(message) => BenchError::QueryExecution(message),
        }
    }
}

impl BenchError {
    /// Short status label used in protocol responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::Connection(_) => "ConnectionError",
            BenchError::Prepare { .. } => "PrepareError",
            BenchError::Classification(_) | BenchError::QueryCount { .. } => "ClassificationError",
            BenchError::QueryExecution(_) => "QueryExecutionError",
            BenchError::Decode(_) => "DecodeError",
            BenchError::Serialization(_) => "SerializationError",
            BenchError::Teardown(_) => "TeardownError",
            BenchError::Config(_) => "ConfigError",
            BenchError::Io(_) => "IoError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let err: BenchError = StoreError::Query("connection reset".to_string()).into();
        assert_eq!(err.kind(), "QueryExecutionError");

        let err: BenchError = StoreError::Prepare {
            query: "SELEC".to_string(),
            message: "syntax error".to_string(),
        }
        .into();
        assert!(matches!(err, BenchError::Prepare { .. }));

        let err: BenchError = StoreError::Decode(DecodeError::Width {
            expected: 3,
            actual: 2,
        })
        .into();
        assert_eq!(err.kind(), "DecodeError");
        assert_eq!(err.to_string(), "decode error: expected 3 columns, row has 2");
    }

    #[test]
    fn count_mismatch_is_a_classification_failure() {
        let err = BenchError::QueryCount {
            kind: EntityKind::Movie,
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.kind(), "ClassificationError");
        assert_eq!(
            err.to_string(),
            "movie expects 4 queries separated by ';', got 3"
        );
    }
}

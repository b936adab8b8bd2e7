//! Embedding and vector index error types.

use thiserror::Error;

/// Errors from embedding backends and the vector index.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Embedding endpoint returned a non-success status.
    #[error("embedding API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// Backend produced an unusable result.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// `SQLite` error (preserves source chain).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure preparing the index location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector length differs from the index dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Index dimensions.
        expected: usize,
        /// Vector length received.
        actual: usize,
    },

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl EmbeddingError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_variants() {
        let cases = vec![
            (
                EmbeddingError::DimensionMismatch {
                    expected: 384,
                    actual: 3,
                },
                "dimension mismatch: expected 384, got 3",
            ),
            (
                EmbeddingError::Api {
                    status: 503,
                    message: "overloaded".into(),
                },
                "embedding API error (503): overloaded",
            ),
            (
                EmbeddingError::Config("missing model".into()),
                "Config error: missing model",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(
            EmbeddingError::Api {
                status: 429,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !EmbeddingError::Api {
                status: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!EmbeddingError::Inference("bad".into()).is_retryable());
    }

    #[test]
    fn sqlite_source_chain_preserved() {
        let err: EmbeddingError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmbeddingError>();
    }
}

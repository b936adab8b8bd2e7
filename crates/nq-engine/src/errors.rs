//! Engine error types.

use nq_catalog::CatalogError;
use nq_core::{CoreError, SynthesisFailureKind};
use nq_embeddings::EmbeddingError;
use nq_llm::GeneratorError;
use thiserror::Error;

/// Errors from a crawl or rebuild.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The catalog read failed; the index was not touched.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Embedding or index storage failed.
    #[error("index update failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// An element could not be serialized for storage.
    #[error("element serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl IndexerError {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Catalog(e) => e.code(),
            Self::Embedding(_) | Self::Serialize(_) => "index-update-failure",
        }
    }
}

/// Errors from context retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Question embedding or index search failed.
    #[error("retrieval backend failed: {0}")]
    Backend(#[from] EmbeddingError),

    /// Admission broke a context invariant.
    #[error("context assembly failed: {0}")]
    Context(#[from] CoreError),
}

impl RetrievalError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            Self::Context(_) => false,
        }
    }
}

/// Errors from one synthesis call.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The generator call failed.
    #[error("generator failed: {0}")]
    Generator(#[from] GeneratorError),

    /// Output did not parse as SQL.
    #[error("generated SQL does not parse: {message}")]
    Malformed {
        /// Extracted text.
        sql: String,
        /// Parser message.
        message: String,
    },

    /// Output held no statement.
    #[error("generator returned no SQL statement")]
    Empty,

    /// Output held several statements.
    #[error("generator returned {count} statements, expected one")]
    MultiStatement {
        /// Extracted text.
        sql: String,
        /// Statement count.
        count: usize,
    },
}

impl SynthesisError {
    /// Failure kind when the output itself was unusable.
    pub fn kind(&self) -> Option<SynthesisFailureKind> {
        match self {
            Self::Generator(_) => None,
            Self::Malformed { .. } => Some(SynthesisFailureKind::Malformed),
            Self::Empty => Some(SynthesisFailureKind::Empty),
            Self::MultiStatement { .. } => Some(SynthesisFailureKind::MultiStatement),
        }
    }

    /// Extracted SQL text, when there was any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Malformed { sql, .. } | Self::MultiStatement { sql, .. } => Some(sql),
            Self::Generator(_) | Self::Empty => None,
        }
    }
}

/// Errors wiring an engine from settings.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required setting is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Annotation file or database setup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Embedder or vector index setup failed.
    #[error("embedding setup failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Generator client setup failed.
    #[error("generator setup failed: {0}")]
    Generator(#[from] GeneratorError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_failures_keep_their_code() {
        let err = IndexerError::from(CatalogError::Unavailable("down".into()));
        assert_eq!(err.code(), "catalog-read-failure");
        assert_eq!(err.to_string(), "catalog unavailable: down");
    }

    #[test]
    fn synthesis_kinds() {
        assert_eq!(SynthesisError::Empty.kind(), Some(SynthesisFailureKind::Empty));
        let multi = SynthesisError::MultiStatement {
            sql: "SELECT 1; SELECT 2".into(),
            count: 2,
        };
        assert_eq!(multi.kind(), Some(SynthesisFailureKind::MultiStatement));
        assert_eq!(multi.sql(), Some("SELECT 1; SELECT 2"));
        assert!(SynthesisError::from(GeneratorError::EmptyResponse).kind().is_none());
    }
}

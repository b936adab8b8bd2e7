//! Catalog error types.
//!
//! Every variant means the catalog read failed as a whole; callers must keep
//! their previous snapshot rather than merge anything from a failed read.

use std::path::PathBuf;

use nq_core::CoreError;
use thiserror::Error;

/// Errors from reading the live schema.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// `SQLite` error (open, privilege, metadata query).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The read produced an inconsistent catalog.
    #[error("inconsistent catalog: {0}")]
    Integrity(#[from] CoreError),

    /// The annotations file could not be loaded.
    #[error("failed to load annotations from {path}: {message}")]
    Annotations {
        /// Annotations file.
        path: PathBuf,
        /// Cause.
        message: String,
    },

    /// The blocking read task failed.
    #[error("catalog read task failed: {0}")]
    Task(String),

    /// The catalog source is not reachable.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// Machine-readable code.
    #[allow(clippy::unused_self)]
    pub fn code(&self) -> &'static str {
        "catalog-read-failure"
    }
}

/// Result alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_share_code() {
        let errs = [
            CatalogError::Task("panicked".into()),
            CatalogError::Unavailable("offline".into()),
            CatalogError::Integrity(CoreError::DuplicateElement("t".into())),
            CatalogError::Sqlite(rusqlite::Error::QueryReturnedNoRows),
        ];
        for e in errs {
            assert_eq!(e.code(), "catalog-read-failure");
        }
    }

    #[test]
    fn annotations_display() {
        let err = CatalogError::Annotations {
            path: PathBuf::from("/etc/nq/ann.json"),
            message: "expected value".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load annotations from /etc/nq/ann.json: expected value"
        );
    }
}

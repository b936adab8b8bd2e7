//! Data-model integrity errors.

use thiserror::Error;

/// Violations of the schema and retrieval-context invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Two elements share a qualified name.
    #[error("duplicate schema element: {0}")]
    DuplicateElement(String),

    /// A column references a parent table that is not in the catalog.
    #[error("column {column} references unknown table {parent}")]
    OrphanColumn {
        /// Qualified column name.
        column: String,
        /// Parent table name as declared.
        parent: String,
    },

    /// A column element was built without a parent table.
    #[error("column {0} has no parent table")]
    MissingParentRef(String),

    /// Admitting an element would push the context over its token budget.
    #[error("admitting {name} ({cost} tokens) exceeds budget: {total} of {budget} used")]
    OverBudget {
        /// Element being admitted.
        name: String,
        /// Token cost of the element.
        cost: usize,
        /// Tokens already used.
        total: usize,
        /// Configured budget.
        budget: usize,
    },

    /// A column was admitted before its parent table.
    #[error("column {column} admitted before its table {parent}")]
    ParentNotAdmitted {
        /// Qualified column name.
        column: String,
        /// Parent table name.
        parent: String,
    },

    /// An element of the wrong kind was passed.
    #[error("expected a {expected} element, got {name}")]
    WrongKind {
        /// Expected kind (`table` or `column`).
        expected: &'static str,
        /// Qualified name of the element.
        name: String,
    },
}

/// Result alias for data-model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_over_budget() {
        let err = CoreError::OverBudget {
            name: "orders".into(),
            cost: 40,
            total: 980,
            budget: 1000,
        };
        assert_eq!(
            err.to_string(),
            "admitting orders (40 tokens) exceeds budget: 980 of 1000 used"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoreError>();
    }
}

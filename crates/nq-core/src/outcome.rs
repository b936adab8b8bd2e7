//! Validation verdicts and execution outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Why a candidate statement was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// Data- or schema-modifying statement, at any nesting depth.
    WriteAttempt,
    /// Table or column not disclosed in the retrieval context.
    UnknownEntity,
    /// Join predicate not backed by a foreign key or matching types.
    InvalidJoin,
    /// The text does not parse as SQL.
    Malformed,
}

impl ReasonCode {
    /// Machine-readable code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WriteAttempt => "write-attempt",
            Self::UnknownEntity => "unknown-entity",
            Self::InvalidJoin => "invalid-join",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of static guardrail validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum ValidationVerdict {
    /// Statement passed every rule.
    Accepted,
    /// Statement failed a rule.
    Rejected {
        /// Rule that failed.
        reason: ReasonCode,
        /// Offending table, column, predicate, or clause.
        fragment: String,
        /// Human-readable explanation.
        message: String,
    },
}

impl ValidationVerdict {
    /// Build a rejection.
    pub fn rejected(
        reason: ReasonCode,
        fragment: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            reason,
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    /// Whether the statement was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Rejection reason, if rejected.
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Self::Accepted => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable database error class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbErrorCode {
    /// Syntax error or unknown object.
    SqlError,
    /// Statement would write.
    ReadOnly,
    /// Statement exceeded the time limit.
    Timeout,
    /// Result exceeded the row limit.
    RowLimitExceeded,
    /// Constraint violation.
    Constraint,
    /// Value of the wrong type.
    TypeMismatch,
    /// Database busy or locked.
    Busy,
    /// Permission denied.
    Privilege,
    /// Could not open or reach the database.
    Connection,
    /// Anything else.
    Other,
}

impl DbErrorCode {
    /// Machine-readable code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SqlError => "sql-error",
            Self::ReadOnly => "read-only",
            Self::Timeout => "timeout",
            Self::RowLimitExceeded => "row-limit-exceeded",
            Self::Constraint => "constraint",
            Self::TypeMismatch => "type-mismatch",
            Self::Busy => "busy",
            Self::Privilege => "privilege",
            Self::Connection => "connection",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured database-reported error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct DatabaseError {
    /// Error class.
    pub code: DbErrorCode,
    /// Database message.
    pub message: String,
    /// Offending table or column, when it can be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl DatabaseError {
    /// Create an error without an offending object.
    pub fn new(code: DbErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            object: None,
        }
    }

    /// Attach the offending object.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }
}

/// Kind of values observed in a result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Only NULLs (or no rows).
    Null,
    /// Booleans.
    Boolean,
    /// Integers.
    Integer,
    /// Floating point (may include integers).
    Real,
    /// Text.
    Text,
    /// More than one incompatible kind.
    Mixed,
}

impl ValueKind {
    /// Kind of one JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Real,
            Value::String(_) => Self::Text,
            Value::Array(_) | Value::Object(_) => Self::Mixed,
        }
    }

    /// Combine two observations of the same column.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Null, k) | (k, Self::Null) => k,
            (Self::Integer, Self::Real) | (Self::Real, Self::Integer) => Self::Real,
            _ => Self::Mixed,
        }
    }
}

/// Column metadata of a result set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    /// Column label as returned by the database.
    pub name: String,
    /// Kind inferred from the returned values.
    pub kind: ValueKind,
}

/// Rows returned by a successful query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column schema.
    pub columns: Vec<ResultColumn>,
    /// Row values in column order.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Build a result set, inferring each column's kind from the rows.
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let kind = rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .fold(ValueKind::Null, |acc, v| acc.merge(ValueKind::of(v)));
                ResultColumn { name, kind }
            })
            .collect();
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Result of executing a validated statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "kebab-case")]
pub enum ExecutionOutcome {
    /// Query succeeded.
    Rows(ResultSet),
    /// Database reported an error.
    Error(DatabaseError),
}

impl ExecutionOutcome {
    /// Whether execution succeeded.
    pub fn is_rows(&self) -> bool {
        matches!(self, Self::Rows(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_serializes_with_kebab_reason() {
        let v = ValidationVerdict::rejected(ReasonCode::WriteAttempt, "DELETE", "not a query");
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["verdict"], "rejected");
        assert_eq!(json["reason"], "write-attempt");
        assert_eq!(json["fragment"], "DELETE");
        assert_eq!(v.reason(), Some(ReasonCode::WriteAttempt));
        assert!(ValidationVerdict::Accepted.is_accepted());
    }

    #[test]
    fn kind_inference_merges_numbers() {
        let rs = ResultSet::from_rows(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec![
                vec![json!(1), json!(1), json!(null), json!("x")],
                vec![json!(2), json!(1.5), json!(null), json!(3)],
            ],
        );
        let kinds: Vec<ValueKind> = rs.columns.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ValueKind::Integer, ValueKind::Real, ValueKind::Null, ValueKind::Mixed]
        );
        assert_eq!(rs.row_count(), 2);
    }

    #[test]
    fn null_does_not_mask_kind() {
        assert_eq!(ValueKind::Null.merge(ValueKind::Text), ValueKind::Text);
        assert_eq!(ValueKind::Text.merge(ValueKind::Null), ValueKind::Text);
    }

    #[test]
    fn database_error_display() {
        let err = DatabaseError::new(DbErrorCode::SqlError, "no such table: invoices")
            .with_object("invoices");
        assert_eq!(err.to_string(), "sql-error: no such table: invoices");
        assert_eq!(err.object.as_deref(), Some("invoices"));
    }

    #[test]
    fn outcome_tagging() {
        let out = ExecutionOutcome::Error(DatabaseError::new(DbErrorCode::Timeout, "interrupted"));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["outcome"], "error");
        assert_eq!(json["data"]["code"], "timeout");
        assert!(!out.is_rows());
    }
}

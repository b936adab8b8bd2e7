//! Guardrail validator.
//!
//! Rules run in a fixed order and the first failure decides the verdict:
//!
//! 1. `read-only-statement`: the top level is a read-only query
//! 2. `known-entities`: every table and column is in the retrieval context
//! 3. `consistent-joins`: every cross-table equality follows a declared key
//!    or compares columns of one type family
//! 4. `no-nested-writes`: no subquery, CTE, or nested statement writes
//!
//! Validation is pure: it never touches the database.

use std::collections::HashMap;

use nq_core::text::truncate_chars;
use nq_core::{ReasonCode, RetrievalContext, SchemaElement, ValidationVerdict};
use nq_settings::{PipelineSettings, SqlDialectKind};
use tracing::debug;

use super::analysis::{ColumnRef, SqlStructure, analyze};
use super::families::type_family;
use super::parse_statements;

/// Validator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Parser dialect.
    pub dialect: SqlDialectKind,
    /// Whether `*` and `t.*` projections are accepted.
    pub allow_wildcard: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            dialect: SqlDialectKind::default(),
            allow_wildcard: true,
        }
    }
}

impl From<&PipelineSettings> for ValidatorOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            dialect: settings.sql_dialect,
            allow_wildcard: settings.allow_wildcard,
        }
    }
}

/// One guardrail rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardrailRule {
    /// Top-level statement must be a read-only query.
    ReadOnlyStatement,
    /// Referenced tables and columns must be in context.
    KnownEntities,
    /// Join predicates must follow keys or matching types.
    ConsistentJoins,
    /// Nested statements must not write.
    NoNestedWrites,
}

impl GuardrailRule {
    /// Evaluation order.
    pub const ORDERED: [Self; 4] = [
        Self::ReadOnlyStatement,
        Self::KnownEntities,
        Self::ConsistentJoins,
        Self::NoNestedWrites,
    ];

    /// Rule identifier for logs.
    pub fn id(self) -> &'static str {
        match self {
            Self::ReadOnlyStatement => "read-only-statement",
            Self::KnownEntities => "known-entities",
            Self::ConsistentJoins => "consistent-joins",
            Self::NoNestedWrites => "no-nested-writes",
        }
    }

    fn check(self, scope: &Scope<'_>, options: &ValidatorOptions) -> Option<ValidationVerdict> {
        match self {
            Self::ReadOnlyStatement => scope.structure.top_level_write.as_ref().map(|kw| {
                ValidationVerdict::rejected(
                    ReasonCode::WriteAttempt,
                    kw.clone(),
                    format!("only read-only SELECT queries are allowed, found {kw}"),
                )
            }),
            Self::KnownEntities => scope.check_entities(options.allow_wildcard),
            Self::ConsistentJoins => scope.check_joins(),
            Self::NoNestedWrites => scope.structure.nested_writes.first().map(|kw| {
                ValidationVerdict::rejected(
                    ReasonCode::WriteAttempt,
                    kw.clone(),
                    format!("nested {kw} is not allowed in a read-only query"),
                )
            }),
        }
    }
}

/// What a name in the statement refers to.
#[derive(Clone, Copy, Debug)]
enum Source<'a> {
    /// A context table.
    Table(&'a SchemaElement),
    /// A CTE, derived table, or table function.
    Local,
}

/// Resolution of one column reference.
#[derive(Clone, Copy, Debug)]
enum Resolved<'a> {
    /// A context column.
    Column(&'a SchemaElement),
    /// A local name, a projection alias, or ambiguous; not checkable.
    Unchecked,
    /// Unknown.
    Missing,
}

/// Name resolution over one statement and context.
struct Scope<'a> {
    structure: &'a SqlStructure,
    context: &'a RetrievalContext,
    sources: HashMap<String, Source<'a>>,
    tables: Vec<&'a SchemaElement>,
}

impl<'a> Scope<'a> {
    fn new(structure: &'a SqlStructure, context: &'a RetrievalContext) -> Self {
        let mut sources = HashMap::new();
        let mut tables: Vec<&SchemaElement> = Vec::new();
        for name in structure.ctes.iter().chain(&structure.derived_aliases) {
            let _ = sources.insert(name.clone(), Source::Local);
        }
        for table in &structure.tables {
            if table.cte {
                if let Some(alias) = &table.alias {
                    let _ = sources.insert(alias.clone(), Source::Local);
                }
                continue;
            }
            let Some(element) = context.table(&table.name) else {
                continue;
            };
            let _ = sources.insert(element.key(), Source::Table(element));
            if let Some(alias) = &table.alias {
                let _ = sources.insert(alias.clone(), Source::Table(element));
            }
            if !tables.iter().any(|t| t.key() == element.key()) {
                tables.push(element);
            }
        }
        Self {
            structure,
            context,
            sources,
            tables,
        }
    }

    fn resolve(&self, column: &ColumnRef) -> Resolved<'a> {
        let context = self.context;
        if let Some(qualifier) = &column.qualifier {
            return match self.sources.get(qualifier) {
                Some(Source::Table(table)) => context
                    .column(&table.qualified_name, &column.name)
                    .map_or(Resolved::Missing, Resolved::Column),
                Some(Source::Local) => Resolved::Unchecked,
                None => Resolved::Missing,
            };
        }

        let mut matches = self
            .tables
            .iter()
            .filter_map(|t| context.column(&t.qualified_name, &column.name));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Resolved::Column(only),
            (Some(_), Some(_)) => Resolved::Unchecked,
            (None, _) => {
                let key = column.name.to_lowercase();
                if self.structure.projection_aliases.contains(&key) || self.structure.opaque_sources {
                    Resolved::Unchecked
                } else {
                    Resolved::Missing
                }
            }
        }
    }

    fn check_entities(&self, allow_wildcard: bool) -> Option<ValidationVerdict> {
        for table in self.structure.base_tables() {
            if self.context.table(&table.name).is_none() {
                return Some(ValidationVerdict::rejected(
                    ReasonCode::UnknownEntity,
                    table.name.clone(),
                    format!("table {} is not in the provided schema", table.name),
                ));
            }
        }

        for wildcard in &self.structure.wildcards {
            let fragment = wildcard.as_ref().map_or_else(|| "*".to_string(), |q| format!("{q}.*"));
            if !allow_wildcard {
                return Some(ValidationVerdict::rejected(
                    ReasonCode::UnknownEntity,
                    fragment,
                    "select explicit columns instead of *",
                ));
            }
            if let Some(qualifier) = wildcard {
                if !self.sources.contains_key(qualifier) {
                    return Some(ValidationVerdict::rejected(
                        ReasonCode::UnknownEntity,
                        fragment,
                        format!("{qualifier} is not a table or alias in this query"),
                    ));
                }
            }
        }

        for column in &self.structure.columns {
            if let Resolved::Missing = self.resolve(column) {
                let message = match &column.qualifier {
                    Some(q) if !self.sources.contains_key(q) => {
                        format!("{q} is not a table or alias in this query")
                    }
                    Some(_) => format!("column {column} is not in the provided schema"),
                    None => format!(
                        "column {} does not belong to any table in this query",
                        column.name
                    ),
                };
                return Some(ValidationVerdict::rejected(
                    ReasonCode::UnknownEntity,
                    column.to_string(),
                    message,
                ));
            }
        }
        None
    }

    fn check_joins(&self) -> Option<ValidationVerdict> {
        for predicate in &self.structure.join_predicates {
            let (Resolved::Column(left), Resolved::Column(right)) =
                (self.resolve(&predicate.left), self.resolve(&predicate.right))
            else {
                continue;
            };
            let left_source = predicate.left.qualifier.clone().or_else(|| left.parent_key());
            let right_source = predicate.right.qualifier.clone().or_else(|| right.parent_key());
            if left_source == right_source {
                continue;
            }
            if joinable(left, right) {
                continue;
            }
            return Some(ValidationVerdict::rejected(
                ReasonCode::InvalidJoin,
                predicate.to_string(),
                format!(
                    "{} ({}) and {} ({}) are not related by a foreign key and have different types",
                    left.qualified_name,
                    left.data_type.as_deref().unwrap_or("ANY"),
                    right.qualified_name,
                    right.data_type.as_deref().unwrap_or("ANY"),
                ),
            ));
        }
        None
    }
}

/// Whether a declared key links the columns (either direction) or their
/// types share a family.
fn joinable(left: &SchemaElement, right: &SchemaElement) -> bool {
    let references = |from: &SchemaElement, to: &SchemaElement| {
        let target = to.key();
        from.foreign_keys.iter().any(|fk| fk.key() == target)
    };
    if references(left, right) || references(right, left) {
        return true;
    }
    match (&left.data_type, &right.data_type) {
        (Some(a), Some(b)) => type_family(a).joinable(type_family(b)),
        _ => false,
    }
}

/// Static validator for candidate SQL.
#[derive(Clone, Debug, Default)]
pub struct GuardrailValidator {
    options: ValidatorOptions,
}

impl GuardrailValidator {
    /// Create a validator.
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    /// Configured options.
    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Validate `sql` against the schema subset in `context`.
    ///
    /// Text that does not parse as exactly one statement is rejected as
    /// `malformed`; the coordinator never gets here with such text because
    /// synthesis rejects it first.
    pub fn validate(&self, sql: &str, context: &RetrievalContext) -> ValidationVerdict {
        let statements = match parse_statements(sql, self.options.dialect) {
            Ok(s) => s,
            Err(e) => {
                return ValidationVerdict::rejected(
                    ReasonCode::Malformed,
                    truncate_chars(sql.trim(), 80, "..."),
                    e.to_string(),
                );
            }
        };
        let [statement] = statements.as_slice() else {
            return ValidationVerdict::rejected(
                ReasonCode::Malformed,
                truncate_chars(sql.trim(), 80, "..."),
                format!("expected exactly one statement, found {}", statements.len()),
            );
        };
        self.validate_structure(&analyze(statement), context)
    }

    /// Run the rules over an analyzed statement.
    pub fn validate_structure(
        &self,
        structure: &SqlStructure,
        context: &RetrievalContext,
    ) -> ValidationVerdict {
        let scope = Scope::new(structure, context);
        for rule in GuardrailRule::ORDERED {
            if let Some(verdict) = rule.check(&scope, &self.options) {
                debug!(rule = rule.id(), reason = ?verdict.reason(), "statement rejected");
                return verdict;
            }
        }
        debug!(
            tables = structure.tables.len(),
            columns = structure.columns.len(),
            "statement accepted"
        );
        ValidationVerdict::Accepted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn shop_context() -> RetrievalContext {
        let mut ctx = RetrievalContext::new(10_000);
        let elements = [
            SchemaElement::table("Customers"),
            SchemaElement::column("Customers", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Customers", "name", "TEXT"),
            SchemaElement::column("Customers", "region", "TEXT"),
            SchemaElement::table("Orders"),
            SchemaElement::column("Orders", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Orders", "customer_id", "INTEGER")
                .with_foreign_key("Customers", "id"),
            SchemaElement::column("Orders", "total", "REAL"),
            SchemaElement::column("Orders", "note", "TEXT"),
        ];
        for el in elements {
            let _ = if el.is_table() {
                ctx.admit_table(el, 1.0, 1).unwrap()
            } else {
                ctx.admit_column(el, 1.0, 1).unwrap()
            };
        }
        ctx
    }

    fn check(sql: &str) -> ValidationVerdict {
        GuardrailValidator::default().validate(sql, &shop_context())
    }

    fn rejected(sql: &str) -> (ReasonCode, String) {
        match check(sql) {
            ValidationVerdict::Rejected {
                reason, fragment, ..
            } => (reason, fragment),
            ValidationVerdict::Accepted => panic!("accepted: {sql}"),
        }
    }

    #[test]
    fn accepts_keyed_join() {
        assert_eq!(
            check(
                "SELECT o.id, c.name FROM Orders o JOIN Customers c ON o.customer_id = c.id \
                 ORDER BY o.id"
            ),
            ValidationVerdict::Accepted
        );
    }

    #[test]
    fn accepts_aggregates_aliases_and_ctes() {
        for sql in [
            "SELECT region, COUNT(*) AS n FROM Customers GROUP BY region ORDER BY n DESC",
            "WITH spend AS (SELECT customer_id, SUM(total) AS spent FROM Orders GROUP BY customer_id) \
             SELECT c.name, s.spent FROM spend s JOIN Customers c ON c.id = s.customer_id",
            "SELECT name FROM Customers WHERE id IN (SELECT customer_id FROM Orders WHERE total > 5)",
            "SELECT * FROM Orders LIMIT 5",
            "SELECT Orders.* FROM Orders",
        ] {
            assert_eq!(check(sql), ValidationVerdict::Accepted, "{sql}");
        }
    }

    #[test]
    fn subquery_alias_does_not_hide_an_outer_table() {
        assert_eq!(
            rejected("SELECT * FROM Secrets WHERE 1 IN (SELECT 1 FROM (SELECT 1) AS Secrets)"),
            (ReasonCode::UnknownEntity, "Secrets".to_string())
        );
        assert_eq!(
            rejected(
                "SELECT * FROM Secrets WHERE 1 IN (WITH Secrets AS (SELECT 1) SELECT * FROM Secrets)"
            ),
            (ReasonCode::UnknownEntity, "Secrets".to_string())
        );
    }

    #[test]
    fn schema_qualified_table_is_never_a_cte() {
        assert_eq!(
            rejected("WITH Secrets AS (SELECT 1) SELECT * FROM main.Secrets"),
            (ReasonCode::UnknownEntity, "Secrets".to_string())
        );
        assert!(check("SELECT main.Orders.id FROM main.Orders").is_accepted());
    }

    #[test]
    fn write_statements_rejected_with_keyword() {
        assert_eq!(
            rejected("DELETE FROM Orders WHERE id = 3"),
            (ReasonCode::WriteAttempt, "DELETE".to_string())
        );
        assert_eq!(
            rejected("UPDATE Orders SET total = 0"),
            (ReasonCode::WriteAttempt, "UPDATE".to_string())
        );
        assert_eq!(rejected("DROP TABLE Orders").0, ReasonCode::WriteAttempt);
        assert_eq!(
            rejected("INSERT INTO Orders (id) VALUES (99)").0,
            ReasonCode::WriteAttempt
        );
    }

    #[test]
    fn write_check_precedes_entity_check() {
        assert_eq!(
            rejected("DELETE FROM Invoices"),
            (ReasonCode::WriteAttempt, "DELETE".to_string())
        );
    }

    #[test]
    fn unknown_table_names_fragment() {
        assert_eq!(
            rejected("SELECT amount FROM Invoices"),
            (ReasonCode::UnknownEntity, "Invoices".to_string())
        );
    }

    #[test]
    fn unknown_columns_rejected() {
        assert_eq!(
            rejected("SELECT o.discount FROM Orders o"),
            (ReasonCode::UnknownEntity, "o.discount".to_string())
        );
        assert_eq!(
            rejected("SELECT email FROM Customers"),
            (ReasonCode::UnknownEntity, "email".to_string())
        );
        assert_eq!(
            rejected("SELECT x.id FROM Orders"),
            (ReasonCode::UnknownEntity, "x.id".to_string())
        );
    }

    #[test]
    fn wildcard_can_be_disabled() {
        let v = GuardrailValidator::new(ValidatorOptions {
            allow_wildcard: false,
            ..ValidatorOptions::default()
        });
        assert_matches!(
            v.validate("SELECT * FROM Orders", &shop_context()),
            ValidationVerdict::Rejected { reason: ReasonCode::UnknownEntity, ref fragment, .. } if fragment == "*"
        );
        assert!(v.validate("SELECT COUNT(*) FROM Orders", &shop_context()).is_accepted());
    }

    #[test]
    fn join_on_mismatched_types_rejected() {
        assert_eq!(
            rejected("SELECT o.id FROM Orders o JOIN Customers c ON o.note = c.id"),
            (ReasonCode::InvalidJoin, "o.note = c.id".to_string())
        );
    }

    #[test]
    fn where_equality_across_tables_is_a_join() {
        assert_eq!(
            rejected("SELECT o.id FROM Orders o, Customers c WHERE o.total = c.name").0,
            ReasonCode::InvalidJoin
        );
        assert!(
            check("SELECT o.id FROM Orders o, Customers c WHERE o.customer_id = c.id").is_accepted()
        );
    }

    #[test]
    fn same_family_join_without_key_is_accepted() {
        assert!(check("SELECT o.id FROM Orders o JOIN Customers c ON o.note = c.region").is_accepted());
    }

    fn postgres() -> GuardrailValidator {
        GuardrailValidator::new(ValidatorOptions {
            dialect: SqlDialectKind::Postgres,
            allow_wildcard: true,
        })
    }

    #[test]
    fn locking_clause_rejected() {
        let verdict = postgres().validate("SELECT id FROM Orders FOR UPDATE", &shop_context());
        assert_eq!(verdict.reason(), Some(ReasonCode::WriteAttempt));
    }

    #[test]
    fn write_inside_cte_rejected() {
        let verdict = postgres().validate(
            "WITH u AS (UPDATE Orders SET total = 0 RETURNING id) SELECT id FROM u",
            &shop_context(),
        );
        assert_matches!(
            verdict,
            ValidationVerdict::Rejected { reason: ReasonCode::WriteAttempt, ref fragment, .. } if fragment == "UPDATE"
        );
    }

    #[test]
    fn unparseable_is_malformed() {
        assert_eq!(rejected("SELEC name FROM").0, ReasonCode::Malformed);
        assert_eq!(rejected("SELECT 1; SELECT 2").0, ReasonCode::Malformed);
    }
}

//! Structural analysis of one parsed statement.
//!
//! [`analyze`] walks the AST once with a [`Visitor`] and records what the
//! guardrail rules need: statement kinds at every depth, table references
//! with aliases, locally defined names (CTEs, derived tables, projection
//! aliases), column references, column equalities, and literals.
//!
//! A `FROM` name resolves to a CTE only when that CTE is defined by the
//! enclosing query or one of its ancestors, and only when the name is
//! unqualified. Every other `FROM` name is a base table. Column qualifiers
//! are resolved statement-wide.

use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, JoinConstraint, JoinOperator, ObjectName, Query, SelectItem,
    SetExpr, Statement, TableFactor, TableWithJoins, Visit, Visitor,
};

/// Column reference as written.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Table, alias, or CTE qualifier (lowercase).
    pub qualifier: Option<String>,
    /// Column name (case preserved).
    pub name: String,
}

impl ColumnRef {
    fn new(qualifier: Option<&str>, name: &str) -> Self {
        Self {
            qualifier: qualifier.map(str::to_lowercase),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Table reference from a `FROM` or `JOIN` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    /// Table name (last name part, case preserved).
    pub name: String,
    /// Alias (lowercase).
    pub alias: Option<String>,
    /// Whether the name resolves to a CTE in scope rather than a base table.
    pub cte: bool,
}

/// Equality between two column references (`ON`, `USING`, or `WHERE`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinPredicate {
    /// Left-hand column.
    pub left: ColumnRef,
    /// Right-hand column.
    pub right: ColumnRef,
}

impl fmt::Display for JoinPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.left, self.right)
    }
}

/// Everything the guardrails inspect about one statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlStructure {
    /// Leading keyword of the top-level statement (`SELECT`, `DELETE`, ...).
    pub statement_keyword: String,
    /// Keyword of the write the top level performs, if it is not a
    /// read-only query.
    pub top_level_write: Option<String>,
    /// Keywords of writes found below the top level.
    pub nested_writes: Vec<String>,
    /// Table references, CTE references included.
    pub tables: Vec<TableRef>,
    /// CTE names (lowercase).
    pub ctes: HashSet<String>,
    /// Derived-table and nested-join aliases (lowercase).
    pub derived_aliases: HashSet<String>,
    /// Whether a table function or other source with unknown columns is used.
    pub opaque_sources: bool,
    /// Projection aliases (lowercase).
    pub projection_aliases: HashSet<String>,
    /// Column references in expressions.
    pub columns: Vec<ColumnRef>,
    /// `*` (`None`) and `q.*` (`Some(q)`) projections.
    pub wildcards: Vec<Option<String>>,
    /// Column equalities.
    pub join_predicates: Vec<JoinPredicate>,
    /// Literal values.
    pub literals: Vec<String>,
}

impl SqlStructure {
    /// Table references that name base tables.
    pub fn base_tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter().filter(|t| !t.cte)
    }
}

/// Analyze one statement.
pub fn analyze(statement: &Statement) -> SqlStructure {
    let keyword = statement_keyword(statement);
    let top_level_write = match statement {
        Statement::Query(query) => query_write(query),
        _ => Some(keyword.clone()),
    };
    let mut collector = Collector {
        out: SqlStructure {
            statement_keyword: keyword,
            top_level_write,
            ..SqlStructure::default()
        },
        top_is_query: matches!(statement, Statement::Query(_)),
        statements_seen: 0,
        queries_seen: 0,
        cte_scopes: Vec::new(),
    };
    let _ = statement.visit(&mut collector);
    collector.out
}

/// First keyword of a statement's SQL rendering.
pub fn statement_keyword(statement: &Statement) -> String {
    match statement {
        Statement::Query(_) => "SELECT".to_string(),
        other => first_keyword(&other.to_string()),
    }
}

fn first_keyword(sql: &str) -> String {
    sql.split_whitespace().next().unwrap_or_default().to_uppercase()
}

/// Write performed by a query's own body, if any: `SELECT INTO`, a locking
/// clause, or a data-modifying body.
fn query_write(query: &Query) -> Option<String> {
    if let Some(lock) = query.locks.first() {
        return Some(lock.to_string().to_uppercase());
    }
    set_expr_write(&query.body)
}

fn set_expr_write(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Select(select) => select.into.as_ref().map(|_| "SELECT INTO".to_string()),
        SetExpr::Query(query) => query_write(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_write(left).or_else(|| set_expr_write(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
        other => Some(first_keyword(&other.to_string())),
    }
}

fn unquote(part: &str) -> String {
    part.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string()
}

fn last_part(name: &ObjectName) -> String {
    name.0
        .last()
        .map_or_else(|| unquote(&name.to_string()), |ident| ident.value.clone())
}

fn compound_ref(parts: &[Ident]) -> Option<ColumnRef> {
    match parts {
        [.., qualifier, column] => Some(ColumnRef::new(Some(&qualifier.value), &column.value)),
        [column] => Some(ColumnRef::new(None, &column.value)),
        [] => None,
    }
}

fn as_column(expr: &Expr) -> Option<ColumnRef> {
    match expr {
        Expr::Identifier(ident) => Some(ColumnRef::new(None, &ident.value)),
        Expr::CompoundIdentifier(parts) => compound_ref(parts),
        Expr::Nested(inner) => as_column(inner),
        _ => None,
    }
}

/// Name a relation is referred to by: its alias, else its table name.
fn relation_ref(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, alias, .. } => Some(
            alias
                .as_ref()
                .map_or_else(|| last_part(name), |a| a.name.value.clone())
                .to_lowercase(),
        ),
        TableFactor::Derived { alias, .. } => alias.as_ref().map(|a| a.name.value.to_lowercase()),
        _ => None,
    }
}

fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        _ => None,
    }
}

struct Collector {
    out: SqlStructure,
    top_is_query: bool,
    statements_seen: usize,
    queries_seen: usize,
    /// CTE names defined by each query being visited, outermost first.
    cte_scopes: Vec<Vec<String>>,
}

impl Collector {
    fn resolves_to_cte(&self, name: &ObjectName) -> bool {
        let [ident] = name.0.as_slice() else {
            return false;
        };
        let key = ident.value.to_lowercase();
        self.cte_scopes.iter().any(|scope| scope.contains(&key))
    }

    fn collect_body(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    match item {
                        SelectItem::ExprWithAlias { alias, .. } => {
                            let _ = self.out.projection_aliases.insert(alias.value.to_lowercase());
                        }
                        SelectItem::Wildcard(_) => self.out.wildcards.push(None),
                        SelectItem::QualifiedWildcard(name, _) => {
                            self.out.wildcards.push(Some(last_part(name).to_lowercase()));
                        }
                        SelectItem::UnnamedExpr(_) => {}
                    }
                }
                for from in &select.from {
                    self.collect_using(from);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_body(left);
                self.collect_body(right);
            }
            _ => {}
        }
    }

    fn collect_using(&mut self, from: &TableWithJoins) {
        let mut left = relation_ref(&from.relation);
        for join in &from.joins {
            if let TableFactor::NestedJoin {
                table_with_joins, ..
            } = &join.relation
            {
                self.collect_using(table_with_joins);
            }
            let right = relation_ref(&join.relation);
            if let (Some(JoinConstraint::Using(columns)), Some(l), Some(r)) =
                (join_constraint(&join.join_operator), &left, &right)
            {
                for column in columns {
                    let name = unquote(&column.to_string());
                    self.out.join_predicates.push(JoinPredicate {
                        left: ColumnRef::new(Some(l), &name),
                        right: ColumnRef::new(Some(r), &name),
                    });
                }
            }
            if right.is_some() {
                left = right;
            }
        }
    }
}

impl Visitor for Collector {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        self.statements_seen += 1;
        if self.statements_seen > 1 && !matches!(statement, Statement::Query(_)) {
            self.out.nested_writes.push(statement_keyword(statement));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.queries_seen += 1;
        let is_top = self.top_is_query && self.queries_seen == 1;
        if !is_top {
            if let Some(write) = query_write(query) {
                self.out.nested_writes.push(write);
            }
        }
        let mut scope = Vec::new();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.to_lowercase();
                let _ = self.out.ctes.insert(name.clone());
                scope.push(name);
            }
        }
        self.cte_scopes.push(scope);
        self.collect_body(&query.body);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        let _ = self.cte_scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let cte = self.resolves_to_cte(name);
                self.out.tables.push(TableRef {
                    name: last_part(name),
                    alias: alias.as_ref().map(|a| a.name.value.to_lowercase()),
                    cte,
                });
            }
            TableFactor::Derived { alias, .. } | TableFactor::NestedJoin { alias, .. } => {
                if let Some(alias) = alias {
                    let _ = self.out.derived_aliases.insert(alias.name.value.to_lowercase());
                }
            }
            _ => self.out.opaque_sources = true,
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                if let Some(column) = as_column(expr) {
                    self.out.columns.push(column);
                }
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if let (Some(left), Some(right)) = (as_column(left), as_column(right)) {
                    self.out.join_predicates.push(JoinPredicate { left, right });
                }
            }
            Expr::Value(value) => self.out.literals.push(value.to_string()),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

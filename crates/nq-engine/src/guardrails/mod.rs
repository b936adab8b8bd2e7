//! Static guardrails for generated SQL.
//!
//! [`analysis`] turns a parsed statement into a [`SqlStructure`];
//! [`validator`] checks that structure against a retrieval context.

pub mod analysis;
pub mod families;
pub mod validator;

use nq_settings::SqlDialectKind;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};

pub use analysis::{ColumnRef, JoinPredicate, SqlStructure, TableRef, analyze};
pub use families::{TypeFamily, type_family};
pub use validator::{GuardrailRule, GuardrailValidator, ValidatorOptions};

/// Parser dialect for a configured target.
pub fn dialect_for(kind: SqlDialectKind) -> Box<dyn Dialect> {
    match kind {
        SqlDialectKind::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialectKind::Postgres => Box::new(PostgreSqlDialect {}),
        SqlDialectKind::Generic => Box::new(GenericDialect {}),
    }
}

/// Parse `sql` into statements with the dialect for `kind`.
pub fn parse_statements(sql: &str, kind: SqlDialectKind) -> Result<Vec<Statement>, ParserError> {
    let dialect = dialect_for(kind);
    Parser::parse_sql(dialect.as_ref(), sql)
}

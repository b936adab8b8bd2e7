//! `SQLite` target database: catalog reads and read-only execution.
//!
//! Every call opens its own read-only connection on a blocking thread, so
//! concurrent sessions never share connection state and a slow statement
//! never stalls the async runtime. Statements run under `PRAGMA query_only`
//! inside a transaction that is always rolled back.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use nq_core::{DatabaseError, DbErrorCode, ResultSet, SchemaCatalog, SchemaElement};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, InterruptHandle, OpenFlags, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::annotations::Annotations;
use crate::errors::{CatalogError, Result};
use crate::traits::{CatalogReader, Database, ExecutionLimits};

static MISSING_OBJECT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"no such (?:table|column|function): ([\w.]+)").ok());

/// A `SQLite` database file opened read-only.
#[derive(Clone, Debug)]
pub struct SqliteDatabase {
    path: PathBuf,
    include_row_counts: bool,
    annotations: Option<Annotations>,
}

impl SqliteDatabase {
    /// Target the database at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include_row_counts: true,
            annotations: None,
        }
    }

    /// Enable or disable `COUNT(*)` row estimates during catalog reads.
    #[must_use]
    pub fn with_row_counts(mut self, enabled: bool) -> Self {
        self.include_row_counts = enabled;
        self
    }

    /// Apply annotations to every catalog read.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )
    }

    fn read_blocking(&self) -> Result<SchemaCatalog> {
        let conn = Self::open(&self.path)?;
        let mut elements = Vec::new();

        let tables: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT name, type FROM sqlite_master
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for (table, kind) in &tables {
            let mut table_el = SchemaElement::table(table.as_str());
            if kind == "view" {
                table_el.description = Some("view".to_string());
            } else if self.include_row_counts {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
                    [],
                    |row| row.get(0),
                )?;
                table_el.row_estimate = u64::try_from(count).ok();
            }
            elements.push(table_el);

            let foreign_keys = read_foreign_keys(&conn, table)?;
            let mut stmt = conn.prepare(
                "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
            )?;
            let columns = stmt
                .query_map(params![table], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for (name, data_type, not_null, pk) in columns {
                let data_type = if data_type.trim().is_empty() {
                    "ANY".to_string()
                } else {
                    data_type
                };
                let mut col = SchemaElement::column(table.as_str(), &name, data_type)
                    .with_nullable(!not_null);
                if pk > 0 {
                    col = col.with_primary_key();
                }
                for (from, target_table, target_column) in &foreign_keys {
                    if from.eq_ignore_ascii_case(&name) {
                        col = col.with_foreign_key(target_table.as_str(), target_column.as_str());
                    }
                }
                elements.push(col);
            }
        }

        let mut catalog = SchemaCatalog::new(elements);
        if let Some(annotations) = &self.annotations {
            let _ = annotations.apply(&mut catalog);
        }
        catalog.validate()?;
        Ok(catalog)
    }
}

/// Double-quote an identifier for interpolation.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `(from column, target table, target column)` for each declared key.
///
/// A key without an explicit target column references the target's primary key.
fn read_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<(String, String, String)>> {
    let mut stmt =
        conn.prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq")?;
    let raw = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut keys = Vec::with_capacity(raw.len());
    for (from, target, to) in raw {
        let to = match to {
            Some(col) => col,
            None => conn
                .query_row(
                    "SELECT name FROM pragma_table_info(?1) WHERE pk = 1",
                    params![target],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .unwrap_or_else(|| "rowid".to_string()),
        };
        keys.push((from, target, to));
    }
    Ok(keys)
}

/// Map a `SQLite` error to a structured database error.
fn map_error(err: &rusqlite::Error) -> DatabaseError {
    let message = err.to_string();
    let code = match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => DbErrorCode::Timeout,
        Some(ErrorCode::ReadOnly) => DbErrorCode::ReadOnly,
        Some(ErrorCode::ConstraintViolation) => DbErrorCode::Constraint,
        Some(ErrorCode::TypeMismatch) => DbErrorCode::TypeMismatch,
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => DbErrorCode::Busy,
        Some(ErrorCode::PermissionDenied | ErrorCode::AuthorizationForStatementDenied) => {
            DbErrorCode::Privilege
        }
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => DbErrorCode::Connection,
        Some(ErrorCode::Unknown) => DbErrorCode::SqlError,
        Some(_) => DbErrorCode::Other,
        None => match err {
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::IntegralValueOutOfRange(..) => {
                DbErrorCode::TypeMismatch
            }
            _ => DbErrorCode::Other,
        },
    };
    let mut out = DatabaseError::new(code, message);
    if let Some(re) = MISSING_OBJECT.as_ref() {
        if let Some(obj) = re.captures(&out.message).and_then(|c| c.get(1)) {
            out.object = Some(obj.as_str().to_string());
        }
    }
    out
}

/// Convert one `SQLite` value to JSON. Non-finite reals become `null` and
/// blobs become base64 strings.
fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

fn run_statement(conn: &Connection, sql: &str, max_rows: usize) -> std::result::Result<ResultSet, DatabaseError> {
    conn.execute_batch("PRAGMA query_only = ON; BEGIN;")
        .map_err(|e| map_error(&e))?;
    let result = query_rows(conn, sql, max_rows);
    if let Err(e) = conn.execute_batch("ROLLBACK;") {
        warn!(error = %e, "rollback failed");
    }
    result
}

fn query_rows(conn: &Connection, sql: &str, max_rows: usize) -> std::result::Result<ResultSet, DatabaseError> {
    let mut stmt = conn.prepare(sql).map_err(|e| map_error(&e))?;
    if !stmt.readonly() {
        return Err(DatabaseError::new(
            DbErrorCode::ReadOnly,
            "statement would modify the database",
        ));
    }
    let names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let width = names.len();

    let mut rows = stmt.query([]).map_err(|e| map_error(&e))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| map_error(&e))? {
        if out.len() == max_rows {
            return Err(DatabaseError::new(
                DbErrorCode::RowLimitExceeded,
                format!("query returned more than {max_rows} rows; add a LIMIT or aggregate"),
            ));
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_json(row.get_ref(i).map_err(|e| map_error(&e))?));
        }
        out.push(values);
    }
    Ok(ResultSet::from_rows(names, out))
}

/// Interrupts the statement if the awaiting future is dropped or times out.
struct InterruptGuard {
    handle: Option<InterruptHandle>,
}

impl InterruptGuard {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.interrupt();
        }
    }
}

#[async_trait]
impl CatalogReader for SqliteDatabase {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn read_catalog(&self) -> Result<SchemaCatalog> {
        let start = Instant::now();
        let this = self.clone();
        let catalog = tokio::task::spawn_blocking(move || this.read_blocking())
            .await
            .map_err(|e| CatalogError::Task(e.to_string()))??;
        debug!(
            elements = catalog.len(),
            duration_ms = start.elapsed().as_millis(),
            "catalog read"
        );
        Ok(catalog)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn execute(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<ResultSet, DatabaseError> {
        let path = self.path.clone();
        let sql_owned = sql.to_string();
        let max_rows = limits.max_rows;
        let (handle_tx, handle_rx) = oneshot::channel();
        let task = tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path).map_err(|e| {
                let mut err = map_error(&e);
                err.code = DbErrorCode::Connection;
                err
            })?;
            if handle_tx.send(conn.get_interrupt_handle()).is_err() {
                return Err(DatabaseError::new(
                    DbErrorCode::Timeout,
                    "caller stopped waiting before the statement started",
                ));
            }
            run_statement(&conn, &sql_owned, max_rows)
        });

        let deadline = tokio::time::Instant::now() + limits.timeout;
        let mut guard = InterruptGuard { handle: None };
        if let Ok(Ok(handle)) = tokio::time::timeout_at(deadline, handle_rx).await {
            guard.handle = Some(handle);
        }
        if let Ok(joined) = tokio::time::timeout_at(deadline, task).await {
            guard.disarm();
            return joined.map_err(|e| DatabaseError::new(DbErrorCode::Other, e.to_string()))?;
        }
        drop(guard);
        Err(DatabaseError::new(
            DbErrorCode::Timeout,
            format!("statement exceeded {}ms", limits.timeout.as_millis()),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn json_conversion_is_lossless_or_null() {
        assert_eq!(to_json(ValueRef::Integer(7)), Value::from(7));
        assert_eq!(to_json(ValueRef::Real(f64::NAN)), Value::Null);
        assert_eq!(to_json(ValueRef::Real(f64::INFINITY)), Value::Null);
        assert_eq!(to_json(ValueRef::Real(1.5)), Value::from(1.5));
        assert_eq!(to_json(ValueRef::Blob(&[1, 2, 3])), Value::from("AQID"));
        assert_eq!(to_json(ValueRef::Text(b"hi")), Value::from("hi"));
    }

    #[test]
    fn missing_table_error_names_object() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.prepare("SELECT * FROM invoices").unwrap_err();
        let mapped = map_error(&err);
        assert_eq!(mapped.code, DbErrorCode::SqlError);
        assert_eq!(mapped.object.as_deref(), Some("invoices"));
    }

    #[test]
    fn write_statement_refused_before_running() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = run_statement(&conn, "DELETE FROM t", 10).unwrap_err();
        assert_eq!(err.code, DbErrorCode::ReadOnly);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 1);
    }
}

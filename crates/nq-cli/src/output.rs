//! Plain-text rendering for terminal output.

use std::fmt::Write as _;

use nq_core::{QuerySession, ResultSet, SchemaCatalog, TerminalStatus};
use nq_engine::CrawlReport;
use nq_engine::render::prompt_line;
use serde_json::Value;

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render rows as an aligned table with a header line.
pub fn format_rows(rows: &ResultSet) -> String {
    let header: Vec<String> = rows.column_names().map(str::to_string).collect();
    let body: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (i, value) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(value.chars().count());
            }
        }
    }

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = line(&header);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &body {
        out.push('\n');
        out.push_str(&line(row));
    }
    out
}

/// Render a terminal session: SQL and rows on success, the failure otherwise.
pub fn format_session(session: &QuerySession) -> String {
    let mut out = String::new();
    let attempts = session.attempt_count();
    let plural = if attempts == 1 { "" } else { "s" };

    match (session.status(), session.result()) {
        (Some(TerminalStatus::Succeeded), Some(rows)) => {
            if let Some(sql) = session.final_sql() {
                let _ = writeln!(out, "{sql}\n");
            }
            let _ = writeln!(out, "{}", format_rows(rows));
            let _ = write!(out, "\n({} rows, {attempts} attempt{plural})", rows.row_count());
        }
        (status, _) => {
            let status = status.map_or("pending", TerminalStatus::as_str);
            let _ = write!(out, "no answer ({status}, {attempts} attempt{plural})");
            if let Some(failure) = session.failure() {
                let _ = write!(out, "\n{}: {}", failure.code, failure.message);
                if let Some(sql) = &failure.last_sql {
                    let _ = write!(out, "\nlast SQL: {sql}");
                }
            }
        }
    }
    out
}

/// Render a catalog the way the generator sees it.
pub fn format_catalog(catalog: &SchemaCatalog) -> String {
    let mut out = String::new();
    for table in catalog.tables() {
        let _ = writeln!(out, "{}", prompt_line(table));
        for column in catalog.columns_of(&table.qualified_name) {
            let _ = writeln!(out, "{}", prompt_line(column));
        }
    }
    out
}

/// One-line crawl summary.
pub fn format_report(report: &CrawlReport) -> String {
    format!(
        "{}: {} added, {} changed, {} removed, {} unchanged in {}ms",
        if report.full_rebuild { "rebuild" } else { "crawl" },
        report.added,
        report.changed,
        report.removed,
        report.unchanged,
        report.duration.as_millis()
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use nq_core::{SchemaElement, SessionFailure};
    use serde_json::json;

    #[test]
    fn rows_are_aligned() {
        let rows = ResultSet::from_rows(
            vec!["id".into(), "name".into()],
            vec![vec![json!(10), json!("Ada")], vec![json!(1234), Value::Null]],
        );
        assert_eq!(
            format_rows(&rows),
            "id   | name\n-----+-----\n10   | Ada\n1234 | NULL"
        );
    }

    #[test]
    fn failed_session_shows_code_and_sql() {
        let mut session = QuerySession::new("q");
        let _ = session.finish(
            TerminalStatus::ExhaustedRetries,
            Some(SessionFailure {
                code: "write-attempt".into(),
                message: "DELETE is not allowed".into(),
                last_sql: Some("DELETE FROM Orders".into()),
            }),
        );
        let text = format_session(&session);
        assert!(text.starts_with("no answer (exhausted-retries, 0 attempts)"));
        assert!(text.contains("write-attempt: DELETE is not allowed"));
        assert!(text.ends_with("last SQL: DELETE FROM Orders"));
    }

    #[test]
    fn catalog_groups_columns_under_tables() {
        let catalog = SchemaCatalog::new(vec![
            SchemaElement::table("Orders"),
            SchemaElement::column("Orders", "id", "INTEGER"),
            SchemaElement::table("Customers"),
        ]);
        let text = format_catalog(&catalog);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().position(|l| l.starts_with("TABLE Orders")).unwrap() + 1
            == lines.iter().position(|l| l.starts_with("  id INTEGER")).unwrap());
    }
}

//! Text renderings of schema elements.
//!
//! Two renderings per element: the embedding text the indexer vectorizes and
//! the prompt line the synthesizer shows the generator. The token cost the
//! retriever budgets against is always taken from the prompt line, so what
//! is budgeted is exactly what is sent.

use nq_core::text::single_line;
use nq_core::tokens::estimate_tokens;
use nq_core::{RetrievalContext, SchemaElement};

/// Canonical embedding text: name, type, constraints, keys, description.
pub fn embedding_text(element: &SchemaElement) -> String {
    let mut parts = Vec::new();
    if element.is_table() {
        parts.push(format!("table {}", element.qualified_name));
    } else {
        let table = element.parent_table.as_deref().unwrap_or_default();
        parts.push(format!("column {} of table {table}", element.name()));
        if let Some(ty) = &element.data_type {
            parts.push(format!("type {}", ty.to_uppercase()));
        }
        if element.primary_key {
            parts.push("primary key".to_string());
        }
        for fk in &element.foreign_keys {
            parts.push(format!("references {}", fk.qualified()));
        }
    }
    if let Some(desc) = &element.description {
        parts.push(single_line(desc));
    }
    parts.join("\n")
}

/// One-line prompt rendering.
///
/// Tables render as a header; columns render indented with their
/// unqualified name, since they are always listed under their table.
pub fn prompt_line(element: &SchemaElement) -> String {
    let mut line = if element.is_table() {
        let mut s = format!("TABLE {}", element.qualified_name);
        if let Some(rows) = element.row_estimate {
            s.push_str(&format!(" (~{rows} rows)"));
        }
        s
    } else {
        let mut s = format!(
            "  {} {}",
            element.name(),
            element.data_type.as_deref().unwrap_or("ANY").to_uppercase()
        );
        if element.primary_key {
            s.push_str(" PRIMARY KEY");
        } else if !element.nullable {
            s.push_str(" NOT NULL");
        }
        for fk in &element.foreign_keys {
            s.push_str(&format!(" REFERENCES {}", fk.qualified()));
        }
        s
    };
    if let Some(desc) = element.description.as_deref().map(single_line) {
        if !desc.is_empty() {
            line.push_str(" -- ");
            line.push_str(&desc);
        }
    }
    line
}

/// Token cost of an element in a retrieval context.
pub fn element_cost(element: &SchemaElement) -> usize {
    estimate_tokens(&prompt_line(element))
}

/// Schema section of a prompt: each admitted table followed by its admitted
/// columns, in admission order.
pub fn schema_section(context: &RetrievalContext) -> String {
    let mut out = String::new();
    for table in context.tables() {
        out.push_str(&prompt_line(table));
        out.push('\n');
        for column in context.columns_of(&table.qualified_name) {
            out.push_str(&prompt_line(column));
            out.push('\n');
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

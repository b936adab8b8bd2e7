//! Business annotations layered over the raw catalog.
//!
//! Databases rarely carry the knowledge a question needs: what a status code
//! means, which table owns a column, or that two tables join on a shared name
//! column without a declared key. An annotations file supplies it:
//!
//! ```json
//! {
//!   "tables": {
//!     "sales_table": {
//!       "description": "One row per transaction. Revenue is SUM(amt).",
//!       "columns": { "status_id": "BIGINT code: 1 = active, 4 = churned" }
//!     }
//!   },
//!   "relationships": [
//!     { "from": "sales_table.customer_name", "to": "customers_table.customer_name" }
//!   ]
//! }
//! ```
//!
//! Relationships become foreign-key targets on the `from` column, so they are
//! rendered to the generator and accepted by join validation.

use std::collections::HashMap;
use std::path::Path;

use nq_core::{ForeignKeyRef, SchemaCatalog};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{CatalogError, Result};

/// Descriptions for one table and its columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableAnnotation {
    /// Table description.
    pub description: Option<String>,
    /// Column name → description.
    pub columns: HashMap<String, String>,
}

/// A join path the database does not declare.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// `table.column` holding the reference.
    pub from: String,
    /// Referenced `table.column`.
    pub to: String,
}

/// Parsed annotations file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotations {
    /// Table name → annotation.
    pub tables: HashMap<String, TableAnnotation>,
    /// Logical relationships.
    pub relationships: Vec<Relationship>,
}

impl Annotations {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let err = |message: String| CatalogError::Annotations {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| err(e.to_string()))
    }

    /// Apply to a catalog in place. Returns how many annotations matched.
    ///
    /// Annotations naming unknown tables or columns are logged and skipped.
    pub fn apply(&self, catalog: &mut SchemaCatalog) -> usize {
        let targets: HashMap<String, usize> = catalog
            .elements()
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key(), i))
            .collect();
        let elements = catalog.elements_mut();
        let mut applied = 0;

        for (table, ann) in &self.tables {
            if let Some(desc) = &ann.description {
                if let Some(&i) = targets.get(&table.to_lowercase()) {
                    elements[i].description = Some(desc.clone());
                    applied += 1;
                } else {
                    warn!(table = %table, "annotation for unknown table, skipping");
                }
            }
            for (column, desc) in &ann.columns {
                let key = format!("{table}.{column}").to_lowercase();
                if let Some(&i) = targets.get(&key) {
                    elements[i].description = Some(desc.clone());
                    applied += 1;
                } else {
                    warn!(column = %key, "annotation for unknown column, skipping");
                }
            }
        }

        for rel in &self.relationships {
            let Some((to_table, to_column)) = rel.to.split_once('.') else {
                warn!(to = %rel.to, "relationship target is not table.column, skipping");
                continue;
            };
            let (Some(&from), true) = (
                targets.get(&rel.from.to_lowercase()),
                targets.contains_key(&rel.to.to_lowercase()),
            ) else {
                warn!(from = %rel.from, to = %rel.to, "relationship names unknown column, skipping");
                continue;
            };
            let fk = ForeignKeyRef::new(to_table, to_column);
            if !elements[from].foreign_keys.iter().any(|f| f.key() == fk.key()) {
                elements[from].foreign_keys.push(fk);
            }
            applied += 1;
        }

        debug!(applied, "applied schema annotations");
        applied
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use nq_core::SchemaElement;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            SchemaElement::table("sales_table"),
            SchemaElement::column("sales_table", "customer_name", "TEXT"),
            SchemaElement::column("sales_table", "status_id", "BIGINT"),
            SchemaElement::table("customers_table"),
            SchemaElement::column("customers_table", "customer_name", "TEXT"),
        ])
    }

    fn annotations() -> Annotations {
        serde_json::from_str(
            r#"{
                "tables": {
                    "Sales_Table": {
                        "description": "one row per transaction",
                        "columns": {"status_id": "1 = active, 4 = churned", "ghost": "x"}
                    },
                    "missing_table": {"description": "nope"}
                },
                "relationships": [
                    {"from": "sales_table.customer_name", "to": "customers_table.customer_name"},
                    {"from": "sales_table.customer_name", "to": "nowhere.id"},
                    {"from": "sales_table.customer_name", "to": "bad"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn applies_descriptions_and_relationships() {
        let mut cat = catalog();
        let applied = annotations().apply(&mut cat);
        assert_eq!(applied, 3);

        assert_eq!(
            cat.get("sales_table").unwrap().description.as_deref(),
            Some("one row per transaction")
        );
        assert_eq!(
            cat.get("sales_table.status_id").unwrap().description.as_deref(),
            Some("1 = active, 4 = churned")
        );
        let fks = &cat.get("sales_table.customer_name").unwrap().foreign_keys;
        assert_eq!(fks, &vec![ForeignKeyRef::new("customers_table", "customer_name")]);
    }

    #[test]
    fn applying_twice_does_not_duplicate_keys() {
        let mut cat = catalog();
        let ann = annotations();
        let _ = ann.apply(&mut cat);
        let _ = ann.apply(&mut cat);
        assert_eq!(
            cat.get("sales_table.customer_name").unwrap().foreign_keys.len(),
            1
        );
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ann.json");
        std::fs::write(&path, "[").unwrap();
        assert_matches!(
            Annotations::load(&path),
            Err(CatalogError::Annotations { path: p, .. }) if p == path
        );
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ann.json");
        std::fs::write(&path, r#"{"relationships": []}"#).unwrap();
        let ann = Annotations::load(&path).unwrap();
        assert!(ann.tables.is_empty());
    }
}

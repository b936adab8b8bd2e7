//! Schema elements and catalog snapshots.
//!
//! A [`SchemaElement`] describes one table or one column. Qualified names are
//! `table` for tables and `table.column` for columns, and compare
//! case-insensitively through [`SchemaElement::key`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CoreError, Result};

/// Kind of schema element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// A table (or view).
    Table,
    /// A column of a table.
    Column,
}

impl ElementKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Column => "column",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared foreign-key target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
}

impl ForeignKeyRef {
    /// Create a new foreign-key reference.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// `table.column` form of the target.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    /// Lowercase `table.column` form of the target.
    pub fn key(&self) -> String {
        self.qualified().to_lowercase()
    }
}

/// One table or column of the live schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaElement {
    /// `table` or `table.column`.
    pub qualified_name: String,
    /// Table or column.
    pub kind: ElementKind,
    /// Declared type (columns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Owning table (columns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_table: Option<String>,
    /// Declared foreign-key targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyRef>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Row-count estimate (tables only). Not part of the content hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<u64>,
}

impl SchemaElement {
    /// Create a table element.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            qualified_name: name.into(),
            kind: ElementKind::Table,
            data_type: None,
            nullable: false,
            primary_key: false,
            parent_table: None,
            foreign_keys: Vec::new(),
            description: None,
            row_estimate: None,
        }
    }

    /// Create a nullable column element of `table`.
    pub fn column(
        table: impl Into<String>,
        name: impl AsRef<str>,
        data_type: impl Into<String>,
    ) -> Self {
        let table = table.into();
        Self {
            qualified_name: format!("{table}.{}", name.as_ref()),
            kind: ElementKind::Column,
            data_type: Some(data_type.into()),
            nullable: true,
            primary_key: false,
            parent_table: Some(table),
            foreign_keys: Vec::new(),
            description: None,
            row_estimate: None,
        }
    }

    /// Set nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark as primary key (implies NOT NULL).
    #[must_use]
    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Add a foreign-key target.
    #[must_use]
    pub fn with_foreign_key(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKeyRef::new(table, column));
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the row-count estimate.
    #[must_use]
    pub fn with_row_estimate(mut self, rows: u64) -> Self {
        self.row_estimate = Some(rows);
        self
    }

    /// Lowercase qualified name, the identity used by the index.
    pub fn key(&self) -> String {
        self.qualified_name.to_lowercase()
    }

    /// Unqualified name: the table name, or the column name for columns.
    pub fn name(&self) -> &str {
        match self.kind {
            ElementKind::Table => &self.qualified_name,
            ElementKind::Column => self
                .qualified_name
                .rsplit_once('.')
                .map_or(self.qualified_name.as_str(), |(_, col)| col),
        }
    }

    /// Whether this is a table element.
    pub fn is_table(&self) -> bool {
        self.kind == ElementKind::Table
    }

    /// Whether this is a column element.
    pub fn is_column(&self) -> bool {
        self.kind == ElementKind::Column
    }

    /// Lowercase parent table name (columns only).
    pub fn parent_key(&self) -> Option<String> {
        self.parent_table.as_deref().map(str::to_lowercase)
    }

    /// Hex SHA-256 over the attributes that define the element's meaning.
    ///
    /// Covers kind, type, nullability, primary key, foreign keys (sorted),
    /// description, and parent. The row estimate is excluded so changing
    /// table sizes never counts as drift.
    pub fn content_hash(&self) -> String {
        let mut fks: Vec<String> = self.foreign_keys.iter().map(ForeignKeyRef::key).collect();
        fks.sort();
        fks.dedup();

        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.data_type.as_deref().unwrap_or("").trim().to_uppercase());
        hasher.update([0]);
        hasher.update([u8::from(self.nullable), u8::from(self.primary_key)]);
        hasher.update(fks.join(",").as_bytes());
        hasher.update([0]);
        hasher.update(self.description.as_deref().unwrap_or("").trim().as_bytes());
        hasher.update([0]);
        hasher.update(self.parent_key().unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One consistent catalog read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    elements: Vec<SchemaElement>,
}

impl SchemaCatalog {
    /// Wrap a list of elements without validating it.
    pub fn new(elements: Vec<SchemaElement>) -> Self {
        Self { elements }
    }

    /// Build a catalog and check its invariants.
    pub fn validated(elements: Vec<SchemaElement>) -> Result<Self> {
        let catalog = Self::new(elements);
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check that names are unique and every column's parent is a table here.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.elements.len());
        let mut tables = HashSet::new();
        for el in &self.elements {
            if !seen.insert(el.key()) {
                return Err(CoreError::DuplicateElement(el.qualified_name.clone()));
            }
            if el.is_table() {
                let _ = tables.insert(el.key());
            }
        }
        for el in self.elements.iter().filter(|e| e.is_column()) {
            let Some(parent) = el.parent_key() else {
                return Err(CoreError::MissingParentRef(el.qualified_name.clone()));
            };
            if !tables.contains(&parent) {
                return Err(CoreError::OrphanColumn {
                    column: el.qualified_name.clone(),
                    parent: el.parent_table.clone().unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    /// All elements in read order.
    pub fn elements(&self) -> &[SchemaElement] {
        &self.elements
    }

    /// Mutable access for post-read enrichment (annotations).
    pub fn elements_mut(&mut self) -> &mut [SchemaElement] {
        &mut self.elements
    }

    /// Consume into the element list.
    pub fn into_elements(self) -> Vec<SchemaElement> {
        self.elements
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the catalog has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Look up an element by qualified name (case-insensitive).
    pub fn get(&self, qualified_name: &str) -> Option<&SchemaElement> {
        let key = qualified_name.to_lowercase();
        self.elements.iter().find(|e| e.key() == key)
    }

    /// Table elements in read order.
    pub fn tables(&self) -> impl Iterator<Item = &SchemaElement> {
        self.elements.iter().filter(|e| e.is_table())
    }

    /// Columns of `table` in read order.
    pub fn columns_of<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a SchemaElement> + 'a {
        let key = table.to_lowercase();
        self.elements
            .iter()
            .filter(move |e| e.is_column() && e.parent_key().as_deref() == Some(key.as_str()))
    }

    /// Elements keyed by [`SchemaElement::key`].
    pub fn by_key(&self) -> HashMap<String, &SchemaElement> {
        self.elements.iter().map(|e| (e.key(), e)).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn orders_catalog() -> Vec<SchemaElement> {
        vec![
            SchemaElement::table("Orders"),
            SchemaElement::column("Orders", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Orders", "customer_id", "INTEGER")
                .with_foreign_key("Customers", "id"),
            SchemaElement::table("Customers"),
            SchemaElement::column("Customers", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Customers", "name", "TEXT"),
        ]
    }

    #[test]
    fn column_naming() {
        let col = SchemaElement::column("Orders", "customer_id", "INTEGER");
        assert_eq!(col.qualified_name, "Orders.customer_id");
        assert_eq!(col.name(), "customer_id");
        assert_eq!(col.key(), "orders.customer_id");
        assert_eq!(col.parent_key().as_deref(), Some("orders"));
    }

    #[test]
    fn table_name_is_qualified_name() {
        assert_eq!(SchemaElement::table("Orders").name(), "Orders");
    }

    #[test]
    fn primary_key_implies_not_null() {
        let col = SchemaElement::column("t", "id", "INTEGER").with_primary_key();
        assert!(col.primary_key);
        assert!(!col.nullable);
    }

    #[test]
    fn hash_ignores_row_estimate() {
        let a = SchemaElement::table("Orders").with_row_estimate(10);
        let b = SchemaElement::table("Orders").with_row_estimate(10_000);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_ignores_foreign_key_order() {
        let a = SchemaElement::column("t", "c", "INT")
            .with_foreign_key("a", "id")
            .with_foreign_key("b", "id");
        let b = SchemaElement::column("t", "c", "INT")
            .with_foreign_key("b", "id")
            .with_foreign_key("a", "id");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn hash_tracks_type_and_description() {
        let base = SchemaElement::column("t", "c", "INTEGER");
        assert_ne!(
            base.content_hash(),
            SchemaElement::column("t", "c", "TEXT").content_hash()
        );
        assert_ne!(
            base.content_hash(),
            base.clone().with_description("amount in cents").content_hash()
        );
        assert_ne!(
            base.content_hash(),
            base.clone().with_nullable(false).content_hash()
        );
    }

    #[test]
    fn hash_type_case_insensitive() {
        assert_eq!(
            SchemaElement::column("t", "c", "integer").content_hash(),
            SchemaElement::column("t", "c", "INTEGER").content_hash()
        );
    }

    #[test]
    fn valid_catalog() {
        let catalog = SchemaCatalog::validated(orders_catalog()).unwrap();
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.tables().count(), 2);
        assert_eq!(catalog.columns_of("orders").count(), 2);
        assert!(catalog.get("CUSTOMERS.NAME").is_some());
    }

    #[test]
    fn duplicate_names_rejected_case_insensitively() {
        let mut elements = orders_catalog();
        elements.push(SchemaElement::table("orders"));
        assert_matches!(
            SchemaCatalog::validated(elements),
            Err(CoreError::DuplicateElement(name)) if name == "orders"
        );
    }

    #[test]
    fn orphan_column_rejected() {
        let mut elements = orders_catalog();
        elements.push(SchemaElement::column("Invoices", "id", "INTEGER"));
        assert_matches!(
            SchemaCatalog::validated(elements),
            Err(CoreError::OrphanColumn { parent, .. }) if parent == "Invoices"
        );
    }

    #[test]
    fn column_without_parent_rejected() {
        let mut col = SchemaElement::column("Orders", "total", "REAL");
        col.parent_table = None;
        let mut elements = orders_catalog();
        elements.push(col);
        assert_matches!(
            SchemaCatalog::validated(elements),
            Err(CoreError::MissingParentRef(_))
        );
    }

    #[test]
    fn serde_camel_case() {
        let col = SchemaElement::column("Orders", "customer_id", "INTEGER")
            .with_foreign_key("Customers", "id");
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["qualifiedName"], "Orders.customer_id");
        assert_eq!(json["kind"], "column");
        assert_eq!(json["foreignKeys"][0]["table"], "Customers");
        assert!(json.get("rowEstimate").is_none());
    }
}

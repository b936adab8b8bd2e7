//! Token-bounded schema context for one question.
//!
//! A [`RetrievalContext`] only grows through [`RetrievalContext::admit_table`]
//! and [`RetrievalContext::admit_column`], which refuse any admission that
//! would exceed the budget or add a column whose table is absent. Every
//! instance therefore satisfies both invariants by construction.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, Result};
use crate::schema::{ElementKind, SchemaElement};

/// One admitted element with its retrieval score and token cost.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// The admitted element.
    pub element: SchemaElement,
    /// Similarity score that ranked it (parents pulled in for a column carry
    /// their own score, or the column's when they were not hits).
    pub score: f32,
    /// Estimated token cost of its prompt rendering.
    pub cost: usize,
}

/// Ordered schema subset selected for one question.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalContext {
    entries: Vec<ContextEntry>,
    total_cost: usize,
    budget: usize,
}

impl RetrievalContext {
    /// Create an empty context with the given token budget.
    pub fn new(budget: usize) -> Self {
        Self {
            entries: Vec::new(),
            total_cost: 0,
            budget,
        }
    }

    /// Configured token budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Tokens used so far.
    pub fn total_cost(&self) -> usize {
        self.total_cost
    }

    /// Tokens still available.
    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.total_cost)
    }

    /// Whether `cost` more tokens fit.
    pub fn fits(&self, cost: usize) -> bool {
        self.total_cost.saturating_add(cost) <= self.budget
    }

    /// Admitted entries in admission order.
    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// Number of admitted elements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was admitted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an element with this qualified name is present.
    pub fn contains(&self, qualified_name: &str) -> bool {
        let key = qualified_name.to_lowercase();
        self.entries.iter().any(|e| e.element.key() == key)
    }

    /// Whether `table` is present.
    pub fn has_table(&self, table: &str) -> bool {
        self.table(table).is_some()
    }

    /// Look up an admitted table (case-insensitive).
    pub fn table(&self, table: &str) -> Option<&SchemaElement> {
        let key = table.to_lowercase();
        self.entries
            .iter()
            .map(|e| &e.element)
            .find(|el| el.is_table() && el.key() == key)
    }

    /// Look up an admitted column of `table` (case-insensitive).
    pub fn column(&self, table: &str, column: &str) -> Option<&SchemaElement> {
        let key = format!("{table}.{column}").to_lowercase();
        self.entries
            .iter()
            .map(|e| &e.element)
            .find(|el| el.is_column() && el.key() == key)
    }

    /// Admitted table elements in admission order.
    pub fn tables(&self) -> impl Iterator<Item = &SchemaElement> {
        self.entries.iter().map(|e| &e.element).filter(|el| el.is_table())
    }

    /// Admitted columns of `table` in admission order.
    pub fn columns_of<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a SchemaElement> + 'a {
        let key = table.to_lowercase();
        self.entries
            .iter()
            .map(|e| &e.element)
            .filter(move |el| el.is_column() && el.parent_key().as_deref() == Some(key.as_str()))
    }

    /// Admit a table. Returns `Ok(false)` when it is already present.
    pub fn admit_table(&mut self, element: SchemaElement, score: f32, cost: usize) -> Result<bool> {
        if element.kind != ElementKind::Table {
            return Err(CoreError::WrongKind {
                expected: "table",
                name: element.qualified_name,
            });
        }
        if self.contains(&element.qualified_name) {
            return Ok(false);
        }
        self.push(element, score, cost)?;
        Ok(true)
    }

    /// Admit a column whose table is already present. Returns `Ok(false)`
    /// when the column is already present.
    pub fn admit_column(&mut self, element: SchemaElement, score: f32, cost: usize) -> Result<bool> {
        if element.kind != ElementKind::Column {
            return Err(CoreError::WrongKind {
                expected: "column",
                name: element.qualified_name,
            });
        }
        let Some(parent) = element.parent_table.clone() else {
            return Err(CoreError::MissingParentRef(element.qualified_name));
        };
        if !self.has_table(&parent) {
            return Err(CoreError::ParentNotAdmitted {
                column: element.qualified_name,
                parent,
            });
        }
        if self.contains(&element.qualified_name) {
            return Ok(false);
        }
        self.push(element, score, cost)?;
        Ok(true)
    }

    fn push(&mut self, element: SchemaElement, score: f32, cost: usize) -> Result<()> {
        if !self.fits(cost) {
            return Err(CoreError::OverBudget {
                name: element.qualified_name,
                cost,
                total: self.total_cost,
                budget: self.budget,
            });
        }
        self.total_cost += cost;
        self.entries.push(ContextEntry {
            element,
            score,
            cost,
        });
        Ok(())
    }

    /// Re-check both invariants. Deserialized contexts are not trusted.
    pub fn check_invariants(&self) -> Result<()> {
        let sum: usize = self.entries.iter().map(|e| e.cost).sum();
        if sum > self.budget || sum != self.total_cost {
            return Err(CoreError::OverBudget {
                name: "<context>".into(),
                cost: sum,
                total: self.total_cost,
                budget: self.budget,
            });
        }
        let mut tables_seen: Vec<String> = Vec::new();
        for entry in &self.entries {
            let el = &entry.element;
            if el.is_table() {
                tables_seen.push(el.key());
                continue;
            }
            let Some(parent) = el.parent_key() else {
                return Err(CoreError::MissingParentRef(el.qualified_name.clone()));
            };
            if !tables_seen.contains(&parent) {
                return Err(CoreError::ParentNotAdmitted {
                    column: el.qualified_name.clone(),
                    parent,
                });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! In-memory catalog for tests and embedding applications.

use async_trait::async_trait;
use nq_core::SchemaCatalog;
use parking_lot::Mutex;

use crate::errors::{CatalogError, Result};
use crate::traits::CatalogReader;

/// Catalog reader returning a replaceable snapshot.
///
/// [`StaticCatalog::fail`] makes subsequent reads fail until
/// [`StaticCatalog::set`] is called again.
pub struct StaticCatalog {
    current: Mutex<Option<SchemaCatalog>>,
    reads: Mutex<usize>,
}

impl StaticCatalog {
    /// Serve `catalog`.
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            current: Mutex::new(Some(catalog)),
            reads: Mutex::new(0),
        }
    }

    /// Replace the served catalog.
    pub fn set(&self, catalog: SchemaCatalog) {
        *self.current.lock() = Some(catalog);
    }

    /// Make reads fail.
    pub fn fail(&self) {
        *self.current.lock() = None;
    }

    /// Number of reads so far, failed ones included.
    pub fn read_count(&self) -> usize {
        *self.reads.lock()
    }
}

#[async_trait]
impl CatalogReader for StaticCatalog {
    async fn read_catalog(&self) -> Result<SchemaCatalog> {
        *self.reads.lock() += 1;
        let catalog = self
            .current
            .lock()
            .clone()
            .ok_or_else(|| CatalogError::Unavailable("catalog source offline".into()))?;
        catalog.validate()?;
        Ok(catalog)
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

    #[tokio::test]
    async fn serves_then_fails_then_recovers() {
        let cat = SchemaCatalog::new(vec![SchemaElement::table("t")]);
        let reader = StaticCatalog::new(cat.clone());
        assert_eq!(reader.read_catalog().await.unwrap(), cat);

        reader.fail();
        assert_matches!(reader.read_catalog().await, Err(CatalogError::Unavailable(_)));

        reader.set(cat.clone());
        assert!(reader.read_catalog().await.is_ok());
        assert_eq!(reader.read_count(), 3);
    }

    #[tokio::test]
    async fn orphan_columns_fail_the_read() {
        let reader = StaticCatalog::new(SchemaCatalog::new(vec![SchemaElement::column(
            "ghost", "id", "INTEGER",
        )]));
        assert_matches!(reader.read_catalog().await, Err(CatalogError::Integrity(_)));
    }
}

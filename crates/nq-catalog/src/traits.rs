//! Capabilities consumed by the engine: catalog reading and query execution.

use std::time::Duration;

use async_trait::async_trait;
use nq_core::{DatabaseError, ResultSet, SchemaCatalog};

use crate::errors::Result;

/// Reads the live schema.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Read every table and column. Never returns a partial catalog.
    async fn read_catalog(&self) -> Result<SchemaCatalog>;
}

/// Bounds applied to one statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Rows beyond this count fail the statement.
    pub max_rows: usize,
    /// Wall-clock limit for the statement.
    pub timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Read-only statement execution.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run one statement in a read-only transaction.
    async fn execute(
        &self,
        sql: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<ResultSet, DatabaseError>;
}

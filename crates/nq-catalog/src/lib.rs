//! # nq-catalog
//!
//! The target database as the engine sees it: a [`CatalogReader`] producing
//! consistent schema snapshots and a [`Database`] running single read-only
//! statements under row and time limits. [`SqliteDatabase`] implements both.

#![deny(unsafe_code)]

pub mod annotations;
pub mod errors;
pub mod mock;
pub mod sqlite;
pub mod traits;

pub use annotations::{Annotations, Relationship, TableAnnotation};
pub use errors::{CatalogError, Result};
pub use mock::StaticCatalog;
pub use sqlite::SqliteDatabase;
pub use traits::{CatalogReader, Database, ExecutionLimits};

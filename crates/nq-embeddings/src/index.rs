//! Vector index capability.
//!
//! The index stores one entry per schema element, keyed by its lowercase
//! qualified name. Entries are overwritten in place or soft-retired; search
//! only ever sees active entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

/// Document written alongside a vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Entry key.
    pub id: String,
    /// Content hash of the source element, used for drift detection.
    pub content_hash: String,
    /// Serialized source element.
    pub metadata: Value,
}

/// Stored entry as read back from the index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Entry key.
    pub id: String,
    /// Content hash at last write.
    pub content_hash: String,
    /// Serialized source element.
    pub metadata: Value,
    /// Whether the entry is visible to search.
    pub active: bool,
    /// Time of last write.
    pub indexed_at: DateTime<Utc>,
}

/// One similarity search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Entry key.
    pub id: String,
    /// Cosine similarity (higher is closer).
    pub score: f32,
    /// Serialized source element.
    pub metadata: Value,
}

/// Embedding space an index was built in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    /// [`crate::Embedder::space_id`] of the embedder used.
    pub id: String,
    /// Vector length.
    pub dimensions: usize,
}

/// Active and retired entry counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    /// Entries visible to search.
    pub active: usize,
    /// Soft-deleted entries.
    pub retired: usize,
}

/// Persistent vector store over schema elements.
///
/// Each write touches a single entry atomically, so concurrent readers see
/// either the old or the new version of an element.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite an entry and mark it active.
    async fn upsert(&self, doc: &IndexDocument, vector: &[f32]) -> Result<()>;

    /// Soft-delete an entry. Returns whether an active entry was retired.
    async fn retire(&self, id: &str) -> Result<bool>;

    /// Top `k` active entries by similarity, ties broken by id.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Read one entry, active or not.
    async fn get(&self, id: &str) -> Result<Option<IndexEntry>>;

    /// All active entries.
    async fn active_entries(&self) -> Result<Vec<IndexEntry>>;

    /// Active and retired counts.
    async fn counts(&self) -> Result<IndexCounts>;

    /// Recorded embedding space, if any.
    async fn embedding_space(&self) -> Result<Option<EmbeddingSpace>>;

    /// Record the embedding space.
    async fn set_embedding_space(&self, space: &EmbeddingSpace) -> Result<()>;

    /// Replace the index contents in one atomic step: write `entries`,
    /// retire active entries not among them, and record `space`. Readers see
    /// either the previous contents or the new ones. Returns the number of
    /// entries retired.
    async fn replace_all(
        &self,
        space: &EmbeddingSpace,
        entries: &[(IndexDocument, Vec<f32>)],
    ) -> Result<usize>;

    /// Remove every entry and the recorded space.
    async fn clear(&self) -> Result<()>;
}

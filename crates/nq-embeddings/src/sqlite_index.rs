//! `SQLite` vector index with BLOB storage and brute-force KNN search.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;

use crate::errors::{EmbeddingError, Result};
use crate::index::{EmbeddingSpace, IndexCounts, IndexDocument, IndexEntry, SearchHit, VectorIndex};
use crate::normalize::{blob_to_f32_vec, cosine_similarity, f32_slice_to_blob};

const UPSERT: &str = "
    INSERT INTO schema_vectors (id, content_hash, metadata, embedding, active, indexed_at, retired_at)
    VALUES (?1, ?2, ?3, ?4, 1, ?5, NULL)
    ON CONFLICT(id) DO UPDATE SET
        content_hash = excluded.content_hash,
        metadata = excluded.metadata,
        embedding = excluded.embedding,
        active = 1,
        indexed_at = excluded.indexed_at,
        retired_at = NULL
";

const RETIRE: &str =
    "UPDATE schema_vectors SET active = 0, retired_at = ?2 WHERE id = ?1 AND active = 1";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_vectors (
        id TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        metadata TEXT NOT NULL,
        embedding BLOB NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        indexed_at INTEGER NOT NULL,
        retired_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_schema_vectors_active ON schema_vectors(active);
    CREATE TABLE IF NOT EXISTS index_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

struct Inner {
    conn: Connection,
    /// Expected vector length; 0 until an embedding space is recorded.
    dims: usize,
}

/// Vector index persisted in a `SQLite` file.
pub struct SqliteVectorIndex {
    inner: Mutex<Inner>,
}

impl SqliteVectorIndex {
    /// Open (or create) an index file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        debug!(?path, "opened vector index");
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory index.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let dims = read_space(&conn)?.map_or(0, |s| s.dimensions);
        Ok(Self {
            inner: Mutex::new(Inner { conn, dims }),
        })
    }

    fn rank(query: &[f32], rows: Vec<(String, Value, Vec<u8>)>, k: usize) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter_map(|(id, metadata, blob)| {
                let embedding = blob_to_f32_vec(&blob);
                (embedding.len() == query.len()).then(|| SearchHit {
                    score: cosine_similarity(query, &embedding),
                    id,
                    metadata,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn read_space(conn: &Connection) -> Result<Option<EmbeddingSpace>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'embedding_space'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| serde_json::from_str(&v).map_err(EmbeddingError::from))
        .transpose()
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexEntry> {
    let millis: i64 = row.get(4)?;
    Ok(IndexEntry {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        metadata: row.get(2)?,
        active: row.get(3)?,
        indexed_at: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
    })
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, doc: &IndexDocument, vector: &[f32]) -> Result<()> {
        let inner = self.inner.lock();
        if inner.dims != 0 && vector.len() != inner.dims {
            return Err(EmbeddingError::DimensionMismatch {
                expected: inner.dims,
                actual: vector.len(),
            });
        }
        let _ = inner.conn.execute(
            UPSERT,
            params![
                doc.id,
                doc.content_hash,
                doc.metadata,
                f32_slice_to_blob(vector),
                now_millis()
            ],
        )?;
        Ok(())
    }

    async fn retire(&self, id: &str) -> Result<bool> {
        let inner = self.inner.lock();
        let changed = inner.conn.execute(RETIRE, params![id, now_millis()])?;
        Ok(changed > 0)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let rows = {
            let inner = self.inner.lock();
            if inner.dims != 0 && vector.len() != inner.dims {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: inner.dims,
                    actual: vector.len(),
                });
            }
            let mut stmt = inner
                .conn
                .prepare_cached("SELECT id, metadata, embedding FROM schema_vectors WHERE active = 1")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<(String, Value, Vec<u8>)>>>()?;
            rows
        };
        Ok(Self::rank(vector, rows, k))
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        let inner = self.inner.lock();
        let entry = inner
            .conn
            .query_row(
                "SELECT id, content_hash, metadata, active, indexed_at FROM schema_vectors WHERE id = ?1",
                params![id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    async fn active_entries(&self) -> Result<Vec<IndexEntry>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare_cached(
            "SELECT id, content_hash, metadata, active, indexed_at FROM schema_vectors
             WHERE active = 1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn counts(&self) -> Result<IndexCounts> {
        let inner = self.inner.lock();
        let (active, retired): (i64, i64) = inner.conn.query_row(
            "SELECT COALESCE(SUM(active = 1), 0), COALESCE(SUM(active = 0), 0) FROM schema_vectors",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexCounts {
            active: active as usize,
            retired: retired as usize,
        })
    }

    async fn embedding_space(&self) -> Result<Option<EmbeddingSpace>> {
        let inner = self.inner.lock();
        read_space(&inner.conn)
    }

    async fn set_embedding_space(&self, space: &EmbeddingSpace) -> Result<()> {
        let mut inner = self.inner.lock();
        let _ = inner.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES ('embedding_space', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![serde_json::to_string(space)?],
        )?;
        inner.dims = space.dimensions;
        Ok(())
    }

    async fn replace_all(
        &self,
        space: &EmbeddingSpace,
        entries: &[(IndexDocument, Vec<f32>)],
    ) -> Result<usize> {
        if let Some((_, vector)) = entries.iter().find(|(_, v)| v.len() != space.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: space.dimensions,
                actual: vector.len(),
            });
        }
        let keep: HashSet<&str> = entries.iter().map(|(doc, _)| doc.id.as_str()).collect();
        let now = now_millis();

        let mut inner = self.inner.lock();
        let tx = inner.conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare_cached("SELECT id FROM schema_vectors WHERE active = 1")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.into_iter().filter(|id| !keep.contains(id.as_str())).collect()
        };
        for id in &stale {
            let _ = tx.execute(RETIRE, params![id, now])?;
        }
        for (doc, vector) in entries {
            let _ = tx.execute(
                UPSERT,
                params![doc.id, doc.content_hash, doc.metadata, f32_slice_to_blob(vector), now],
            )?;
        }
        let _ = tx.execute(
            "INSERT INTO index_meta (key, value) VALUES ('embedding_space', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![serde_json::to_string(space)?],
        )?;
        tx.commit()?;
        inner.dims = space.dimensions;
        debug!(written = entries.len(), retired = stale.len(), "index replaced");
        Ok(stale.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .conn
            .execute_batch("DELETE FROM schema_vectors; DELETE FROM index_meta;")?;
        inner.dims = 0;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

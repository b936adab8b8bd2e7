//! Schema indexer: keeps the vector index in step with the live catalog.
//!
//! A crawl reads the catalog, diffs it against the index's active entries by
//! content hash, embeds and upserts added and changed elements, and retires
//! removed ones. Unchanged elements are never rewritten, so re-crawling a
//! stable schema costs one catalog read and no embedding calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nq_catalog::CatalogReader;
use nq_core::{SchemaCatalog, SchemaElement};
use nq_embeddings::{Embedder, EmbeddingSpace, IndexDocument, IndexEntry, VectorIndex};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::IndexerError;
use crate::metrics::{
    CRAWL_DURATION_SECONDS, CRAWL_FAILURES_TOTAL, CRAWL_RETIRES_TOTAL, CRAWL_UPSERTS_TOTAL,
};
use crate::render::embedding_text;

/// Texts per embedding call.
const EMBED_BATCH: usize = 64;

/// Difference between the indexed snapshot and a fresh catalog read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaDiff {
    /// Elements with no active entry.
    pub added: Vec<SchemaElement>,
    /// Elements whose content hash differs from the entry's.
    pub changed: Vec<SchemaElement>,
    /// Keys of active entries absent from the catalog, columns first.
    pub removed: Vec<String>,
    /// Elements whose entry is current.
    pub unchanged: usize,
}

impl SchemaDiff {
    /// Whether applying the diff would write nothing.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Summary of one crawl.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    /// Elements embedded for the first time.
    pub added: usize,
    /// Elements re-embedded after drift.
    pub changed: usize,
    /// Entries retired.
    pub removed: usize,
    /// Elements left untouched.
    pub unchanged: usize,
    /// Whether the whole index was rebuilt.
    pub full_rebuild: bool,
    /// Wall time.
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Compare indexed entries with a catalog snapshot.
///
/// `previous` maps entry keys to their stored content hashes. Added and
/// changed elements are ordered tables first; removed keys columns first,
/// so applying the diff in order never leaves a column without its table.
pub fn diff(previous: &HashMap<String, String>, current: &SchemaCatalog) -> SchemaDiff {
    let mut out = SchemaDiff::default();
    let mut seen = std::collections::HashSet::with_capacity(current.len());

    for element in current.elements() {
        let key = element.key();
        match previous.get(&key) {
            None => out.added.push(element.clone()),
            Some(hash) if *hash != element.content_hash() => out.changed.push(element.clone()),
            Some(_) => out.unchanged += 1,
        }
        let _ = seen.insert(key);
    }

    out.removed = previous
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect();
    out.removed.sort_by(|a, b| b.contains('.').cmp(&a.contains('.')).then(a.cmp(b)));
    out.added.sort_by_key(SchemaElement::is_column);
    out.changed.sort_by_key(SchemaElement::is_column);
    out
}

/// Background-capable crawler over one catalog, embedder and index.
pub struct SchemaIndexer {
    catalog: Arc<dyn CatalogReader>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    crawl_lock: Mutex<()>,
    wake: Notify,
}

impl SchemaIndexer {
    /// Create an indexer.
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            index,
            crawl_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Embedding space of the configured embedder.
    pub fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace {
            id: self.embedder.space_id(),
            dimensions: self.embedder.dimensions(),
        }
    }

    /// Run one incremental crawl.
    ///
    /// A failed catalog read returns before any index write. If the index was
    /// built in a different embedding space every element is re-embedded and
    /// the index contents are replaced in one step.
    #[instrument(skip_all)]
    pub async fn crawl(&self) -> Result<CrawlReport, IndexerError> {
        self.run(false).await
    }

    /// Re-embed every element from a fresh read and replace the index
    /// contents in one step. Searches running meanwhile see the previous
    /// entries.
    #[instrument(skip_all)]
    pub async fn rebuild(&self) -> Result<CrawlReport, IndexerError> {
        self.run(true).await
    }

    /// Wake a running [`SchemaIndexer::spawn_periodic`] loop for an
    /// immediate crawl.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Crawl every `interval` (and on [`SchemaIndexer::trigger`]) until
    /// `cancel` fires. The first crawl starts immediately. Failures are
    /// logged and the loop continues.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    () = this.wake.notified() => debug!("crawl triggered"),
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = this.crawl() => {
                        if let Err(e) = result {
                            warn!(error = %e, code = e.code(), "crawl failed, keeping previous index");
                        }
                    }
                }
            }
            debug!("indexer loop stopped");
        })
    }

    async fn run(&self, force_rebuild: bool) -> Result<CrawlReport, IndexerError> {
        let _guard = self.crawl_lock.lock().await;
        let start = Instant::now();

        let catalog = match self.catalog.read_catalog().await {
            Ok(c) => c,
            Err(e) => {
                metrics::counter!(CRAWL_FAILURES_TOTAL).increment(1);
                return Err(e.into());
            }
        };

        let space = self.space();
        let recorded = self.index.embedding_space().await?;
        let full_rebuild = force_rebuild || recorded.as_ref() != Some(&space);
        let (delta, removed) = if full_rebuild {
            if let Some(old) = &recorded {
                if *old != space {
                    info!(old = %old.id, new = %space.id, "embedding space changed, re-embedding all elements");
                }
            }
            let delta = diff(&HashMap::new(), &catalog);
            let entries = self.embed(&delta.added).await?;
            let removed = self.index.replace_all(&space, &entries).await?;
            (delta, removed)
        } else {
            let previous: HashMap<String, String> = self
                .index
                .active_entries()
                .await?
                .into_iter()
                .map(|e: IndexEntry| (e.id, e.content_hash))
                .collect();
            let delta = diff(&previous, &catalog);
            self.embed_and_upsert(&delta.added).await?;
            self.embed_and_upsert(&delta.changed).await?;
            let removed = self.retire(&delta.removed).await?;
            (delta, removed)
        };

        let report = CrawlReport {
            added: delta.added.len(),
            changed: delta.changed.len(),
            removed,
            unchanged: delta.unchanged,
            full_rebuild,
            duration: start.elapsed(),
        };
        metrics::histogram!(CRAWL_DURATION_SECONDS).record(report.duration.as_secs_f64());
        metrics::counter!(CRAWL_UPSERTS_TOTAL, "change" => "added").increment(report.added as u64);
        metrics::counter!(CRAWL_UPSERTS_TOTAL, "change" => "changed")
            .increment(report.changed as u64);
        metrics::counter!(CRAWL_RETIRES_TOTAL).increment(report.removed as u64);
        info!(
            added = report.added,
            changed = report.changed,
            removed = report.removed,
            unchanged = report.unchanged,
            full_rebuild,
            duration_ms = report.duration.as_millis(),
            "crawl complete"
        );
        Ok(report)
    }

    /// Embed elements in batches, keeping their order.
    async fn embed(
        &self,
        elements: &[SchemaElement],
    ) -> Result<Vec<(IndexDocument, Vec<f32>)>, IndexerError> {
        let mut out = Vec::with_capacity(elements.len());
        for chunk in elements.chunks(EMBED_BATCH) {
            let texts: Vec<String> = chunk.iter().map(embedding_text).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != chunk.len() {
                return Err(nq_embeddings::EmbeddingError::Inference(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    vectors.len()
                ))
                .into());
            }
            for (element, vector) in chunk.iter().zip(vectors) {
                let doc = IndexDocument {
                    id: element.key(),
                    content_hash: element.content_hash(),
                    metadata: serde_json::to_value(element)?,
                };
                out.push((doc, vector));
            }
        }
        Ok(out)
    }

    /// Embed elements and write each entry on its own. Callers pass tables
    /// before columns.
    async fn embed_and_upsert(&self, elements: &[SchemaElement]) -> Result<(), IndexerError> {
        for (doc, vector) in self.embed(elements).await? {
            self.index.upsert(&doc, &vector).await?;
            debug!(element = %doc.id, "indexed element");
        }
        Ok(())
    }

    /// Soft-delete entries. Callers pass columns before tables.
    async fn retire(&self, keys: &[String]) -> Result<usize, IndexerError> {
        let mut retired = 0;
        for key in keys {
            if self.index.retire(key).await? {
                retired += 1;
                debug!(element = %key, "retired element");
            }
        }
        Ok(retired)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use nq_catalog::{CatalogError, StaticCatalog};
    use nq_embeddings::{HashingEmbedder, IndexCounts, SqliteVectorIndex};

    /// Embedder that can park its next call until released.
    struct GatedEmbedder {
        inner: HashingEmbedder,
        hold: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                inner: HashingEmbedder::new(dims),
                hold: AtomicBool::new(false),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        async fn embed(&self, texts: &[String]) -> nq_embeddings::Result<Vec<Vec<f32>>> {
            if self.hold.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.embed(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn space_id(&self) -> String {
            self.inner.space_id()
        }
    }

    fn shop() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            SchemaElement::table("Customers"),
            SchemaElement::column("Customers", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Customers", "name", "TEXT"),
            SchemaElement::table("Orders"),
            SchemaElement::column("Orders", "id", "INTEGER").with_primary_key(),
            SchemaElement::column("Orders", "customer_id", "INTEGER")
                .with_foreign_key("Customers", "id"),
        ])
    }

    fn hashes(catalog: &SchemaCatalog) -> HashMap<String, String> {
        catalog
            .elements()
            .iter()
            .map(|e| (e.key(), e.content_hash()))
            .collect()
    }

    fn setup(dims: usize) -> (Arc<StaticCatalog>, Arc<SqliteVectorIndex>, SchemaIndexer) {
        let catalog = Arc::new(StaticCatalog::new(shop()));
        let index = Arc::new(SqliteVectorIndex::in_memory().unwrap());
        let indexer = SchemaIndexer::new(
            catalog.clone(),
            Arc::new(HashingEmbedder::new(dims)),
            index.clone(),
        );
        (catalog, index, indexer)
    }

    #[test]
    fn diff_orders_writes_and_retires() {
        let mut prev = hashes(&shop());
        let _ = prev.insert("legacy".into(), "h".into());
        let _ = prev.insert("legacy.code".into(), "h".into());
        let mut current: Vec<SchemaElement> = shop().into_elements();
        current[2] = SchemaElement::column("Customers", "name", "VARCHAR(80)");
        current.push(SchemaElement::column("Orders", "total", "REAL"));
        current.push(SchemaElement::table("Invoices"));

        let d = diff(&prev, &SchemaCatalog::new(current));
        assert_eq!(
            d.added.iter().map(|e| e.key()).collect::<Vec<_>>(),
            vec!["invoices", "orders.total"]
        );
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].key(), "customers.name");
        assert_eq!(d.removed, vec!["legacy.code", "legacy"]);
        assert_eq!(d.unchanged, 5);
    }

    #[test]
    fn diff_of_identical_snapshot_is_empty() {
        let d = diff(&hashes(&shop()), &shop());
        assert!(d.is_empty());
        assert_eq!(d.unchanged, 6);
    }

    #[tokio::test]
    async fn first_crawl_indexes_everything() {
        let (_, index, indexer) = setup(64);
        let report = indexer.crawl().await.unwrap();
        assert_eq!(report.added, 6);
        assert!(report.full_rebuild);
        assert_eq!(index.counts().await.unwrap().active, 6);
        assert_eq!(index.embedding_space().await.unwrap(), Some(indexer.space()));
    }

    #[tokio::test]
    async fn recrawl_without_changes_writes_nothing() {
        let (_, index, indexer) = setup(64);
        let _ = indexer.crawl().await.unwrap();
        let before = index.get("orders.customer_id").await.unwrap().unwrap();

        let report = indexer.crawl().await.unwrap();
        assert_eq!((report.added, report.changed, report.removed), (0, 0, 0));
        assert_eq!(report.unchanged, 6);
        assert!(!report.full_rebuild);
        let after = index.get("orders.customer_id").await.unwrap().unwrap();
        assert_eq!(before.indexed_at, after.indexed_at);
    }

    #[tokio::test]
    async fn dropped_table_is_retired_with_its_columns() {
        let (catalog, index, indexer) = setup(64);
        let _ = indexer.crawl().await.unwrap();

        catalog.set(SchemaCatalog::new(
            shop()
                .into_elements()
                .into_iter()
                .filter(|e| !e.key().starts_with("orders"))
                .collect(),
        ));
        let report = indexer.crawl().await.unwrap();
        assert_eq!(report.removed, 3);
        let counts = index.counts().await.unwrap();
        assert_eq!((counts.active, counts.retired), (3, 3));
        assert!(!index.get("orders").await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn failed_read_leaves_index_untouched() {
        let (catalog, index, indexer) = setup(64);
        let _ = indexer.crawl().await.unwrap();
        catalog.fail();

        let err = indexer.crawl().await.unwrap_err();
        assert_matches!(err, IndexerError::Catalog(CatalogError::Unavailable(_)));
        assert_eq!(err.code(), "catalog-read-failure");
        assert_eq!(index.counts().await.unwrap().active, 6);
    }

    #[tokio::test]
    async fn space_change_forces_full_reembed() {
        let catalog = Arc::new(StaticCatalog::new(shop()));
        let index = Arc::new(SqliteVectorIndex::in_memory().unwrap());
        let small = SchemaIndexer::new(
            catalog.clone(),
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
        );
        let _ = small.crawl().await.unwrap();

        let large = SchemaIndexer::new(catalog, Arc::new(HashingEmbedder::new(128)), index.clone());
        let report = large.crawl().await.unwrap();
        assert!(report.full_rebuild);
        assert_eq!(report.added, 6);
        assert_eq!(index.embedding_space().await.unwrap().unwrap().dimensions, 128);
    }

    #[tokio::test]
    async fn rebuild_reembeds_stable_catalog() {
        let (_, _, indexer) = setup(64);
        let _ = indexer.crawl().await.unwrap();
        let report = indexer.rebuild().await.unwrap();
        assert!(report.full_rebuild);
        assert_eq!(report.added, 6);
        assert_eq!(report.unchanged, 0);
    }

    #[tokio::test]
    async fn rebuild_retires_elements_missing_from_catalog() {
        let (catalog, index, indexer) = setup(64);
        let _ = indexer.crawl().await.unwrap();
        catalog.set(SchemaCatalog::new(vec![
            SchemaElement::table("Customers"),
            SchemaElement::column("Customers", "id", "INTEGER").with_primary_key(),
        ]));

        let report = indexer.rebuild().await.unwrap();
        assert_eq!((report.added, report.removed), (2, 4));
        assert_eq!(
            index.counts().await.unwrap(),
            IndexCounts {
                active: 2,
                retired: 4
            }
        );
    }

    #[tokio::test]
    async fn search_sees_previous_entries_while_rebuilding() {
        let catalog = Arc::new(StaticCatalog::new(shop()));
        let index = Arc::new(SqliteVectorIndex::in_memory().unwrap());
        let embedder = Arc::new(GatedEmbedder::new(64));
        let indexer = Arc::new(SchemaIndexer::new(catalog, embedder.clone(), index.clone()));
        let _ = indexer.crawl().await.unwrap();
        let before = index.get("orders").await.unwrap().unwrap();

        embedder.hold.store(true, Ordering::SeqCst);
        let running = {
            let indexer = Arc::clone(&indexer);
            tokio::spawn(async move { indexer.rebuild().await })
        };
        embedder.entered.notified().await;

        let query = HashingEmbedder::new(64).embed_single("orders").await.unwrap();
        assert_eq!(index.search(&query, 10).await.unwrap().len(), 6);
        assert_eq!(index.get("orders").await.unwrap().unwrap().indexed_at, before.indexed_at);

        embedder.release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert!(report.full_rebuild);
        assert_eq!(report.removed, 0);
        assert_eq!(
            index.counts().await.unwrap(),
            IndexCounts {
                active: 6,
                retired: 0
            }
        );
    }

    #[tokio::test]
    async fn periodic_loop_crawls_and_stops() {
        let (catalog, index, indexer) = setup(64);
        let indexer = Arc::new(indexer);
        let cancel = CancellationToken::new();
        let handle = indexer.spawn_periodic(Duration::from_secs(3600), cancel.clone());

        for _ in 0..200 {
            if index.counts().await.unwrap().active == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(index.counts().await.unwrap().active, 6);

        catalog.set(SchemaCatalog::new(vec![SchemaElement::table("Customers")]));
        indexer.trigger();
        for _ in 0..200 {
            if index.counts().await.unwrap().active == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(index.counts().await.unwrap().active, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}

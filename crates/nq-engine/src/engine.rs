//! Top-level engine: one indexer plus one coordinator over shared backends.

use std::sync::Arc;

use nq_catalog::{Annotations, CatalogReader, Database, SqliteDatabase};
use nq_core::QuerySession;
use nq_embeddings::{Embedder, HashingEmbedder, HttpEmbedder, SqliteVectorIndex, VectorIndex};
use nq_llm::{CompletionOptions, Generator, OpenAiCompatGenerator};
use nq_settings::{EmbeddingProvider, NexusSettings, expand_home};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::{CoordinatorLimits, ExecutionCoordinator};
use crate::errors::EngineError;
use crate::guardrails::{GuardrailValidator, ValidatorOptions};
use crate::indexer::SchemaIndexer;
use crate::retriever::ContextRetriever;
use crate::synthesizer::QuerySynthesizer;

/// Backends an engine runs against.
#[derive(Clone)]
pub struct EngineComponents {
    /// Schema source for the indexer.
    pub catalog: Arc<dyn CatalogReader>,
    /// Statement executor.
    pub database: Arc<dyn Database>,
    /// Embedding backend shared by indexer and retriever.
    pub embedder: Arc<dyn Embedder>,
    /// Vector index shared by indexer and retriever.
    pub index: Arc<dyn VectorIndex>,
    /// SQL generator.
    pub generator: Arc<dyn Generator>,
}

impl EngineComponents {
    /// Build the production backends described by `settings`.
    ///
    /// Requires `database.path`. The index file is created if missing.
    pub fn from_settings(settings: &NexusSettings) -> Result<Self, EngineError> {
        let path = settings
            .database
            .path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| EngineError::Config("database.path is not set".to_string()))?;

        let mut sqlite =
            SqliteDatabase::new(expand_home(path)).with_row_counts(settings.catalog.include_row_counts);
        if let Some(annotations) = settings.catalog.annotations_path.as_deref() {
            sqlite = sqlite.with_annotations(Annotations::load(&expand_home(annotations))?);
        }
        let sqlite = Arc::new(sqlite);

        let embedder: Arc<dyn Embedder> = match settings.embedding.provider {
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(settings.embedding.dimensions)),
            EmbeddingProvider::Http => Arc::new(HttpEmbedder::from_settings(&settings.embedding)?),
        };
        let index = Arc::new(SqliteVectorIndex::open(&expand_home(&settings.index.path))?);
        let generator = Arc::new(OpenAiCompatGenerator::from_settings(&settings.generator)?);

        debug!(
            database = %sqlite.path().display(),
            index = %settings.index.path,
            space = %embedder.space_id(),
            model = %settings.generator.model,
            "engine components ready"
        );
        Ok(Self {
            catalog: sqlite.clone(),
            database: sqlite,
            embedder,
            index,
            generator,
        })
    }
}

/// Answers natural-language questions over one database.
pub struct QueryEngine {
    indexer: Arc<SchemaIndexer>,
    coordinator: ExecutionCoordinator,
    max_attempts: u32,
}

impl QueryEngine {
    /// Wire an engine from explicit backends.
    pub fn new(components: EngineComponents, settings: &NexusSettings) -> Self {
        let EngineComponents {
            catalog,
            database,
            embedder,
            index,
            generator,
        } = components;

        let indexer = Arc::new(SchemaIndexer::new(catalog, Arc::clone(&embedder), Arc::clone(&index)));
        let retriever = ContextRetriever::new(embedder, index, settings.retrieval.candidate_limit);
        let synthesizer = QuerySynthesizer::new(
            generator,
            CompletionOptions {
                temperature: settings.generator.temperature,
                max_tokens: settings.generator.max_tokens,
            },
            settings.pipeline.sql_dialect,
            settings.pipeline.max_error_chars,
        );
        let validator = GuardrailValidator::new(ValidatorOptions::from(&settings.pipeline));
        let coordinator = ExecutionCoordinator::new(
            retriever,
            synthesizer,
            validator,
            database,
            CoordinatorLimits::from(settings),
        );
        Self {
            indexer,
            coordinator,
            max_attempts: settings.pipeline.max_attempts,
        }
    }

    /// Wire an engine from settings alone.
    pub fn from_settings(settings: &NexusSettings) -> Result<Self, EngineError> {
        let engine = Self::new(EngineComponents::from_settings(settings)?, settings);
        info!(max_attempts = engine.max_attempts, "query engine ready");
        Ok(engine)
    }

    /// The schema indexer.
    pub fn indexer(&self) -> &Arc<SchemaIndexer> {
        &self.indexer
    }

    /// The execution coordinator.
    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    /// Attempt limit per session.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Answer `question`, returning the terminal session.
    pub async fn ask(&self, question: &str) -> QuerySession {
        self.ask_with_cancel(question, &CancellationToken::new()).await
    }

    /// [`QueryEngine::ask`] under a cancellation token.
    pub async fn ask_with_cancel(&self, question: &str, cancel: &CancellationToken) -> QuerySession {
        self.coordinator
            .run_with_cancel(QuerySession::new(question), self.max_attempts, cancel)
            .await
    }

    /// Drive an existing session. Terminal sessions come back unchanged.
    pub async fn run(&self, session: QuerySession) -> QuerySession {
        self.coordinator.run(session, self.max_attempts).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

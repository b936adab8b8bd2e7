//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial JSON
//! files are accepted and missing fields keep their compiled default.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "database": { "path": "/data/shop.db" },
///   "retrieval": { "tokenBudget": 2000 },
///   "pipeline": { "maxAttempts": 3 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NexusSettings {
    /// Target database.
    pub database: DatabaseSettings,
    /// Catalog reading.
    pub catalog: CatalogSettings,
    /// Vector index storage and crawl cadence.
    pub index: IndexSettings,
    /// Embedding backend.
    pub embedding: EmbeddingSettings,
    /// Context retrieval.
    pub retrieval: RetrievalSettings,
    /// Generation backend.
    pub generator: GeneratorSettings,
    /// Query pipeline.
    pub pipeline: PipelineSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl NexusSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "pipeline.maxAttempts must be at least 1".into(),
            ));
        }
        if self.retrieval.token_budget == 0 {
            return Err(SettingsError::InvalidValue(
                "retrieval.tokenBudget must be at least 1".into(),
            ));
        }
        if self.retrieval.retry_budget_multiplier < 1.0 {
            return Err(SettingsError::InvalidValue(
                "retrieval.retryBudgetMultiplier must be >= 1.0".into(),
            ));
        }
        if self.retrieval.max_token_budget < self.retrieval.token_budget {
            return Err(SettingsError::InvalidValue(
                "retrieval.maxTokenBudget must be >= retrieval.tokenBudget".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(SettingsError::InvalidValue(
                "embedding.dimensions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Target database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the `SQLite` database file.
    pub path: Option<String>,
    /// Maximum rows a query may return before it is reported as an error.
    pub max_rows: usize,
    /// Statement time limit in milliseconds.
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_rows: 1000,
            statement_timeout_ms: 10_000,
        }
    }
}

/// Catalog reading settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSettings {
    /// Optional JSON file with descriptions and logical relationships.
    pub annotations_path: Option<String>,
    /// Count rows per table during catalog reads.
    pub include_row_counts: bool,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            annotations_path: None,
            include_row_counts: true,
        }
    }
}

/// Vector index settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexSettings {
    /// Index database path. `~` expands to `$HOME`.
    pub path: String,
    /// Seconds between background crawls.
    pub crawl_interval_secs: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            path: "~/.nexusquery/index.db".to_string(),
            crawl_interval_secs: 300,
        }
    }
}

/// Embedding backend kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local deterministic feature hashing.
    #[default]
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

/// Embedding backend settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    /// Backend kind.
    pub provider: EmbeddingProvider,
    /// Vector dimensions.
    pub dimensions: usize,
    /// Model name (HTTP provider).
    pub model: String,
    /// API base URL (HTTP provider).
    pub base_url: String,
    /// Environment variable holding the API key (HTTP provider).
    pub api_key_env: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dimensions: 384,
            model: "all-MiniLM-L6-v2".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "EMBEDDING_API_KEY".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Context retrieval settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalSettings {
    /// Token budget of the schema section of a prompt.
    pub token_budget: usize,
    /// Number of index hits considered per question.
    pub candidate_limit: usize,
    /// Budget growth applied after an `unknown-entity` rejection.
    pub retry_budget_multiplier: f64,
    /// Ceiling for widened budgets.
    pub max_token_budget: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            token_budget: 1500,
            candidate_limit: 64,
            retry_budget_multiplier: 1.0,
            max_token_budget: 4000,
        }
    }
}

/// Generation backend settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSettings {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            timeout_ms: 30_000,
        }
    }
}

/// SQL dialect used to parse generated statements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialectKind {
    /// ANSI-ish generic dialect.
    Generic,
    /// `SQLite`.
    #[default]
    Sqlite,
    /// `PostgreSQL`.
    Postgres,
}

impl SqlDialectKind {
    /// Display name used in prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Generic => "ANSI SQL",
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }
}

/// Query pipeline settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Synthesis attempts per session, including the first.
    pub max_attempts: u32,
    /// Dialect of generated SQL.
    pub sql_dialect: SqlDialectKind,
    /// Longest prior-error text included in a retry prompt.
    pub max_error_chars: usize,
    /// Allow `*` projections.
    pub allow_wildcard: bool,
    /// Time limit for embedding the question, in milliseconds.
    pub embed_timeout_ms: u64,
    /// Time limit for the index search, in milliseconds.
    pub search_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            sql_dialect: SqlDialectKind::Sqlite,
            max_error_chars: 500,
            allow_wildcard: true,
            embed_timeout_ms: 10_000,
            search_timeout_ms: 5_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

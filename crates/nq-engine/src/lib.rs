//! # nq-engine
//!
//! The NexusQuery pipeline from schema to rows.
//!
//! - [`SchemaIndexer`]: incremental schema crawls into the vector index
//! - [`ContextRetriever`]: budget-bounded schema subset for one question
//! - [`QuerySynthesizer`]: one generator round-trip per attempt
//! - [`GuardrailValidator`]: static read-only, entity and join checks
//! - [`ExecutionCoordinator`]: the retry state machine tying them together
//! - [`QueryEngine`]: wiring from settings, `ask(question)` entry point

#![deny(unsafe_code)]

pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod guardrails;
pub mod indexer;
pub mod metrics;
pub mod render;
pub mod retriever;
pub mod synthesizer;

pub use coordinator::{CoordinatorLimits, EMPTY_QUESTION, ExecutionCoordinator};
pub use engine::{EngineComponents, QueryEngine};
pub use errors::{EngineError, IndexerError, RetrievalError, SynthesisError};
pub use guardrails::{GuardrailRule, GuardrailValidator, ValidatorOptions};
pub use indexer::{CrawlReport, SchemaDiff, SchemaIndexer};
pub use retriever::{Candidate, ContextRetriever};
pub use synthesizer::{PriorFailure, QuerySynthesizer, extract_sql};

//! # nq-embeddings
//!
//! Embedding backends and the persistent schema vector index.
//!
//! - [`Embedder`]: text → vector capability, with a local [`HashingEmbedder`]
//!   and an OpenAI-compatible [`HttpEmbedder`]
//! - [`VectorIndex`]: upsert / retire / search over schema elements, with the
//!   `SQLite`-backed [`SqliteVectorIndex`]

#![deny(unsafe_code)]

pub mod embedder;
pub mod errors;
pub mod http;
pub mod index;
pub mod normalize;
pub mod sqlite_index;

pub use embedder::{Embedder, HashingEmbedder};
pub use errors::{EmbeddingError, Result};
pub use http::HttpEmbedder;
pub use index::{EmbeddingSpace, IndexCounts, IndexDocument, IndexEntry, SearchHit, VectorIndex};
pub use sqlite_index::SqliteVectorIndex;

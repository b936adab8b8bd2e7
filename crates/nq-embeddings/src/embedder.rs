//! Embedding backends.
//!
//! An [`Embedder`] maps text to fixed-length vectors. Output is deterministic
//! for identical input within one embedding space, identified by
//! [`Embedder::space_id`]. The index records the space it was built in so a
//! backend change forces a full re-embed instead of mixing spaces.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed one text.
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.embed(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| EmbeddingError::Inference("empty embedding batch".into()))
    }

    /// Output vector length.
    fn dimensions(&self) -> usize;

    /// Identifier of the embedding space (backend, model, dimensions).
    fn space_id(&self) -> String;
}

/// Words dropped before hashing.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "by", "each", "for", "from", "give", "how", "in", "is", "list",
    "me", "of", "on", "or", "per", "show", "that", "the", "to", "what", "which", "with",
];

/// Deterministic local embedder using signed feature hashing.
///
/// Identifiers are split on `_`, `.` and case boundaries, lowercased, and
/// stripped of a plural `s`, so `customer_id` and "customers" share the
/// `customer` feature. Each token adds ±1 to one SHA-256-selected bucket.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    /// Create an embedder with `dims` buckets.
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Normalized tokens of `text` as the embedder sees them.
    pub fn tokens(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            for part in split_camel(word) {
                let lower = part.to_lowercase();
                if lower.is_empty() || STOP_WORDS.contains(&lower.as_str()) {
                    continue;
                }
                out.push(stem(&lower));
            }
        }
        out
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in Self::tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&digest[..8]);
            let bucket = usize::try_from(u64::from_le_bytes(idx_bytes) % self.dims as u64)
                .unwrap_or_default();
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

fn split_camel(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..i]);
            start = i;
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn space_id(&self) -> String {
        format!("hashing-v1/{}", self.dims)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

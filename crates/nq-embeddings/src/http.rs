//! OpenAI-compatible `/embeddings` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedder::Embedder;
use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// Embedder backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dims: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl HttpEmbedder {
    /// Create a client for `base_url` (without the `/embeddings` suffix).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dims,
        })
    }

    /// Build from settings, reading the API key from the configured env var.
    pub fn from_settings(settings: &nq_settings::EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            api_key,
            settings.dimensions,
            Duration::from_millis(settings.timeout_ms),
        )
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        debug!(%url, count = texts.len(), model = %self.model, "embedding request");

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut body: EmbeddingResponse = response.json().await?;
        if body.data.len() != texts.len() {
            return Err(EmbeddingError::Inference(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|d| d.index);
        body.data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dims {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.dims,
                        actual: d.embedding.len(),
                    });
                }
                let mut v = d.embedding;
                l2_normalize(&mut v);
                Ok(v)
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn space_id(&self) -> String {
        format!("http/{}/{}", self.model, self.dims)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer, dims: usize) -> HttpEmbedder {
        HttpEmbedder::new(
            server.uri(),
            "test-model",
            Some("sk-test".into()),
            dims,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_vectors_in_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 2.0]},
                    {"index": 0, "embedding": [3.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = embedder(&server, 2)
            .embed(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn api_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = embedder(&server, 2).embed_single("a").await.unwrap_err();
        assert_matches!(err, EmbeddingError::Api { status: 503, .. });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn wrong_dimensions_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let err = embedder(&server, 2).embed_single("a").await.unwrap_err();
        assert_matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[tokio::test]
    async fn empty_batch_skips_request() {
        let server = MockServer::start().await;
        let out = embedder(&server, 2).embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn space_id_names_model() {
        let e = HttpEmbedder::new("http://x/", "m", None, 8, Duration::from_secs(1)).unwrap();
        assert_eq!(e.space_id(), "http/m/8");
        assert_eq!(e.base_url, "http://x");
    }
}

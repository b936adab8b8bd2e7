//! OpenAI-compatible chat-completions client (Groq, `OpenAI`, local servers).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::generator::{CompletionOptions, GeneratorError, GeneratorResult, Generator};

/// Generator speaking the `/chat/completions` protocol.
pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatGenerator {
    /// Create a client for `base_url` (without `/chat/completions`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> GeneratorResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Build from settings, reading the API key from the configured env var.
    pub fn from_settings(settings: &nq_settings::GeneratorSettings) -> GeneratorResult<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!(env = %settings.api_key_env, "generator API key not set");
        }
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            api_key,
            Duration::from_millis(settings.timeout_ms),
        )
    }

    fn status_error(status: reqwest::StatusCode, retry_after: Option<u64>, body: String) -> GeneratorError {
        match status.as_u16() {
            401 | 403 => GeneratorError::Auth { message: body },
            429 => GeneratorError::RateLimited {
                retry_after_ms: retry_after.map_or(1000, |s| s * 1000),
                message: body,
            },
            code => GeneratorError::Api {
                status: code,
                message: body,
                retryable: status.is_server_error(),
            },
        }
    }
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> GeneratorResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %self.model, prompt_chars = prompt.len(), "completion request");

        let mut request = self.client.post(&url).json(&ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            metrics::counter!("nq_generator_errors_total", "status" => status.as_u16().to_string())
                .increment(1);
            return Err(Self::status_error(status, retry_after, body));
        }

        let body: ChatResponse = response.json().await?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(GeneratorError::EmptyResponse)?;
        Ok(text)
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
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OpenAiCompatGenerator {
        OpenAiCompatGenerator::new(
            server.uri(),
            "llama-test",
            Some("gsk-test".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .and(body_partial_json(json!({
                "model": "llama-test",
                "messages": [{"role": "user", "content": "write sql"}],
                "temperature": 0.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "```sql\nSELECT 1\n```"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = generator(&server)
            .complete("write sql", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "```sql\nSELECT 1\n```");
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, GeneratorError::Auth { ref message } if message == "invalid api key");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GeneratorError::RateLimited {
                retry_after_ms: 7000,
                ..
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_retryable_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = generator(&server)
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GeneratorError::Api {
                status: 503,
                retryable: true,
                ..
            }
        );
    }

    #[tokio::test]
    async fn blank_content_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "   "}}]
            })))
            .mount(&server)
            .await;

        let err = generator(&server)
            .complete("q", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, GeneratorError::EmptyResponse);
    }
}

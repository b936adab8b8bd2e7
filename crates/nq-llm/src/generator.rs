//! # Generator Trait
//!
//! Single round-trip text completion. The engine keeps no session memory in
//! the backend: every prompt is self-contained.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type alias for generator operations.
pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Errors that can occur during a completion call.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed (missing or invalid key).
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the backend.
    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested retry delay in milliseconds.
        retry_after_ms: u64,
        /// Error description.
        message: String,
    },

    /// Backend returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Whether this error can be retried.
        retryable: bool,
    },

    /// Backend answered without any text.
    #[error("empty completion")]
    EmptyResponse,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl GeneratorError {
    /// Whether another call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::RateLimited { .. } | Self::EmptyResponse => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Auth { .. } | Self::Json(_) | Self::Other { .. } => false,
        }
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::EmptyResponse => "empty",
            Self::Other { .. } => "unknown",
        }
    }
}

/// Per-call sampling options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Text generation capability.
///
/// Implementors must be `Send + Sync` so one generator can serve many
/// concurrent sessions.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Complete `prompt` in one round-trip.
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> GeneratorResult<String>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            GeneratorError::RateLimited {
                retry_after_ms: 1000,
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(
            !GeneratorError::Auth {
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(
            GeneratorError::Api {
                status: 502,
                message: String::new(),
                retryable: true
            }
            .is_retryable()
        );
        assert!(GeneratorError::EmptyResponse.is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(
            GeneratorError::Auth {
                message: String::new()
            }
            .category(),
            "auth"
        );
        assert_eq!(GeneratorError::EmptyResponse.category(), "empty");
    }

    #[test]
    fn options_default() {
        let o = CompletionOptions::default();
        assert!(o.temperature.abs() < f32::EPSILON);
        assert_eq!(o.max_tokens, 1024);
    }
}

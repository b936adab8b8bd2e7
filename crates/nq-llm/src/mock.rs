//! Scripted generator for deterministic tests without API calls.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::generator::{CompletionOptions, GeneratorError, GeneratorResult, Generator};

/// One pre-programmed reply.
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with this error.
    Error(GeneratorError),
    /// Sleep, then produce the inner reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    /// Convenience: plain text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Convenience: reply with a fenced `sql` block.
    pub fn sql(sql: &str) -> Self {
        Self::Text(format!("```sql\n{sql}\n```"))
    }

    /// Convenience: delayed reply.
    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Generator that returns scripted replies in order and records prompts.
///
/// When the script runs out, the last text reply is repeated if
/// [`ScriptedGenerator::repeating`] was used; otherwise calls fail.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    repeat: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Replies consumed in order.
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`.
    pub fn repeating(text: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(text.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    async fn resolve(reply: ScriptedReply) -> GeneratorResult<String> {
        let mut reply = reply;
        loop {
            match reply {
                ScriptedReply::Text(t) => return Ok(t),
                ScriptedReply::Error(e) => return Err(e),
                ScriptedReply::Delay(d, inner) => {
                    tokio::time::sleep(d).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> GeneratorResult<String> {
        self.prompts.lock().push(prompt.to_string());
        let next = self.replies.lock().pop_front();
        match (next, &self.repeat) {
            (Some(reply), _) => Self::resolve(reply).await,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(GeneratorError::Other {
                message: "script exhausted".into(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Query synthesizer: one generator round-trip per attempt.
//!
//! The prompt carries only the admitted schema subset, the question, and on
//! a retry the previous SQL with its structured error. The reply must hold
//! exactly one parseable statement; anything else is a synthesis failure the
//! coordinator may retry, never a guardrail verdict.

use std::sync::{Arc, LazyLock};

use nq_core::text::truncate_chars;
use nq_core::{AttemptError, RetrievalContext};
use nq_llm::{CompletionOptions, Generator};
use nq_settings::SqlDialectKind;
use regex::Regex;
use tracing::{debug, instrument};

use crate::errors::SynthesisError;
use crate::guardrails::parse_statements;
use crate::render::schema_section;

static SQL_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)```\s*sql\s*\n(.*?)```").ok());
static ANY_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n(.*?)```").ok());

/// Failure of the previous attempt, shown to the generator on retry.
#[derive(Clone, Copy, Debug)]
pub struct PriorFailure<'a> {
    /// SQL the previous attempt produced, if any.
    pub sql: Option<&'a str>,
    /// Why it failed.
    pub error: &'a AttemptError,
}

/// Pull SQL out of generator text: the first ```` ```sql ```` block, else the
/// first fenced block, else the whole text.
pub fn extract_sql(text: &str) -> String {
    for fence in [&*SQL_FENCE, &*ANY_FENCE].into_iter().flatten() {
        if let Some(body) = fence.captures(text).and_then(|c| c.get(1)) {
            return body.as_str().trim().to_string();
        }
    }
    text.trim().to_string()
}

/// Require exactly one parseable statement.
pub fn check_single_statement(sql: &str, dialect: SqlDialectKind) -> Result<(), SynthesisError> {
    if sql.trim().is_empty() {
        return Err(SynthesisError::Empty);
    }
    let statements = parse_statements(sql, dialect).map_err(|e| SynthesisError::Malformed {
        sql: sql.to_string(),
        message: e.to_string(),
    })?;
    match statements.len() {
        0 => Err(SynthesisError::Empty),
        1 => Ok(()),
        count => Err(SynthesisError::MultiStatement {
            sql: sql.to_string(),
            count,
        }),
    }
}

/// Turns a question and a retrieval context into one candidate statement.
pub struct QuerySynthesizer {
    generator: Arc<dyn Generator>,
    options: CompletionOptions,
    dialect: SqlDialectKind,
    max_error_chars: usize,
}

impl QuerySynthesizer {
    /// Create a synthesizer.
    pub fn new(
        generator: Arc<dyn Generator>,
        options: CompletionOptions,
        dialect: SqlDialectKind,
        max_error_chars: usize,
    ) -> Self {
        Self {
            generator,
            options,
            dialect,
            max_error_chars,
        }
    }

    /// Target dialect.
    pub fn dialect(&self) -> SqlDialectKind {
        self.dialect
    }

    /// Render the prompt for one attempt.
    pub fn build_prompt(
        &self,
        question: &str,
        context: &RetrievalContext,
        prior: Option<&PriorFailure<'_>>,
    ) -> String {
        let dialect = self.dialect.display_name();
        let mut prompt = format!(
            "You write {dialect} queries. Answer the question with exactly one read-only \
             SELECT statement.\n\
             Use only the tables and columns listed in the schema. Join tables only on the \
             listed REFERENCES or on columns of the same type.\n\
             Reply with the query in a single ```sql code block and nothing else.\n\n\
             Schema:\n{}\nQuestion: {}\n",
            schema_section(context),
            question.trim()
        );
        if let Some(prior) = prior {
            let error = truncate_chars(
                &format!("{}: {}", prior.error.code(), prior.error),
                self.max_error_chars,
                "...",
            );
            prompt.push_str("\nYour previous answer was rejected.\n");
            if let Some(sql) = prior.sql {
                prompt.push_str(&format!("Previous SQL:\n```sql\n{}\n```\n", sql.trim()));
            }
            prompt.push_str(&format!("Error: {error}\nWrite a corrected query.\n"));
        }
        prompt
    }

    /// Generate one candidate statement.
    #[instrument(skip_all, fields(model = self.generator.model(), retry = prior.is_some()))]
    pub async fn synthesize(
        &self,
        question: &str,
        context: &RetrievalContext,
        prior: Option<&PriorFailure<'_>>,
    ) -> Result<String, SynthesisError> {
        let prompt = self.build_prompt(question, context, prior);
        let text = self.generator.complete(&prompt, &self.options).await?;
        let sql = extract_sql(&text);
        check_single_statement(&sql, self.dialect)?;
        debug!(sql = %nq_core::text::single_line(&sql), "candidate synthesized");
        Ok(sql)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Query session lifecycle state.
//!
//! A [`QuerySession`] records one question's attempts and, once finished, its
//! terminal status. Terminal sessions are frozen: [`QuerySession::push_attempt`]
//! and [`QuerySession::finish`] become no-ops after the first `finish`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::RetrievalContext;
use crate::outcome::{DatabaseError, ExecutionOutcome, ReasonCode, ResultSet, ValidationVerdict};

/// Terminal status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalStatus {
    /// A validated statement executed and returned rows.
    Succeeded,
    /// A non-retryable failure ended the session.
    Rejected,
    /// Every attempt failed.
    ExhaustedRetries,
}

impl TerminalStatus {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::ExhaustedRetries => "exhausted-retries",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step that produced a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    /// Embedding the question and searching the index.
    Retrieval,
    /// Calling the generator.
    Synthesis,
    /// Static validation.
    Validation,
    /// Running the statement.
    Execution,
}

impl PipelineStep {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
            Self::Validation => "validation",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why generator output could not be turned into one statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesisFailureKind {
    /// Output did not parse as SQL.
    Malformed,
    /// Output contained no statement.
    Empty,
    /// Output contained more than one statement.
    MultiStatement,
}

impl fmt::Display for SynthesisFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Malformed => "malformed",
            Self::Empty => "empty",
            Self::MultiStatement => "multi-statement",
        })
    }
}

/// Structured failure of one attempt, fed back to the next synthesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttemptError {
    /// Generator output was not exactly one statement.
    #[error("synthesis failure ({kind}): {message}")]
    Synthesis {
        /// Failure kind.
        kind: SynthesisFailureKind,
        /// Parser or extraction detail.
        message: String,
    },

    /// Guardrail rejection.
    #[error("validation rejected ({reason}) at `{fragment}`: {message}")]
    Validation {
        /// Failed rule.
        reason: ReasonCode,
        /// Offending fragment.
        fragment: String,
        /// Explanation.
        message: String,
    },

    /// Database-reported error.
    #[error("execution error ({0})")]
    Execution(DatabaseError),

    /// A step exceeded its time limit.
    #[error("{step} timed out after {limit_ms}ms")]
    Timeout {
        /// Step that timed out.
        step: PipelineStep,
        /// Configured limit.
        limit_ms: u64,
    },

    /// An external backend failed.
    #[error("{step} backend error: {message}")]
    Backend {
        /// Step whose backend failed.
        step: PipelineStep,
        /// Backend message.
        message: String,
        /// Whether another attempt may succeed.
        retryable: bool,
    },

    /// The session was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl AttemptError {
    /// Machine-readable code reported in a terminal failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Synthesis { .. } => "synthesis-failure",
            Self::Validation { reason, .. } => reason.as_str(),
            Self::Execution(_) => "execution-error",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend-error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Cancelled => false,
            _ => true,
        }
    }

    /// Step the failure is attributed to, when it names one.
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            Self::Synthesis { .. } => Some(PipelineStep::Synthesis),
            Self::Validation { .. } => Some(PipelineStep::Validation),
            Self::Execution(_) => Some(PipelineStep::Execution),
            Self::Timeout { step, .. } | Self::Backend { step, .. } => Some(*step),
            Self::Cancelled => None,
        }
    }

    /// Offending object, when known.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            Self::Validation { fragment, .. } => Some(fragment),
            Self::Execution(e) => e.object.as_deref(),
            _ => None,
        }
    }
}

/// One synthesis → validation → execution pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Candidate SQL, when synthesis produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Validator verdict, when validation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
    /// Execution outcome, when execution ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    /// Failure of this attempt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AttemptError>,
    /// Wall time of the attempt.
    pub duration_ms: u64,
}

impl Attempt {
    /// Start an empty attempt record.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            sql: None,
            verdict: None,
            outcome: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Terminal failure as seen by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailure {
    /// Last reason code (`write-attempt`, `execution-error`, ...).
    pub code: String,
    /// Last failure message.
    pub message: String,
    /// Last rejected or erroring SQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sql: Option<String>,
}

/// One question's lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySession {
    id: Uuid,
    question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<RetrievalContext>,
    attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<TerminalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<SessionFailure>,
    created_at: DateTime<Utc>,
}

impl QuerySession {
    /// Start a pending session for `question`.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            question: question.into(),
            context: None,
            attempts: Vec::new(),
            status: None,
            failure: None,
            created_at: Utc::now(),
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The question text.
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Most recent retrieval context.
    pub fn context(&self) -> Option<&RetrievalContext> {
        self.context.as_ref()
    }

    /// Attempts in order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Terminal status, once finished.
    pub fn status(&self) -> Option<TerminalStatus> {
        self.status
    }

    /// Whether the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    /// Failure details for non-successful sessions.
    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// SQL of the last attempt that produced one.
    pub fn final_sql(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.sql.as_deref())
    }

    /// Rows of a succeeded session.
    pub fn result(&self) -> Option<&ResultSet> {
        if self.status != Some(TerminalStatus::Succeeded) {
            return None;
        }
        self.attempts.last().and_then(|a| match &a.outcome {
            Some(ExecutionOutcome::Rows(rows)) => Some(rows),
            _ => None,
        })
    }

    /// Replace the retrieval context. Ignored once terminal.
    pub fn set_context(&mut self, context: RetrievalContext) {
        if !self.is_terminal() {
            self.context = Some(context);
        }
    }

    /// Record an attempt. Ignored once terminal.
    pub fn push_attempt(&mut self, attempt: Attempt) {
        if !self.is_terminal() {
            self.attempts.push(attempt);
        }
    }

    /// Enter a terminal state. Returns `false` if already terminal.
    pub fn finish(&mut self, status: TerminalStatus, failure: Option<SessionFailure>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = Some(status);
        self.failure = failure;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

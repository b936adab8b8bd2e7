//! Execution coordinator: drives one question through retrieval, synthesis,
//! validation and execution with a bounded retry loop.
//!
//! ```text
//! Pending → Retrieving → Synthesizing → Validating → Executing → Finished
//!                ↑             ↑             │            │
//!                └──── RetryPending ◄────────┴────────────┘
//! ```
//!
//! Every external step runs under its own timeout and the caller's
//! cancellation token. Failures become structured [`AttemptError`]s; the
//! caller only ever sees a terminal [`QuerySession`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nq_catalog::{Database, ExecutionLimits};
use nq_core::{
    Attempt, AttemptError, ExecutionOutcome, PipelineStep, QuerySession, ReasonCode,
    SessionFailure, TerminalStatus, ValidationVerdict,
};
use nq_settings::NexusSettings;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use crate::errors::SynthesisError;
use crate::guardrails::GuardrailValidator;
use crate::metrics::{
    ATTEMPTS_TOTAL, EXECUTION_ERRORS_TOTAL, SESSION_DURATION_SECONDS, SESSIONS_TOTAL,
    STEP_TIMEOUTS_TOTAL, SYNTHESIS_FAILURES_TOTAL, VALIDATION_REJECTIONS_TOTAL,
};
use crate::retriever::ContextRetriever;
use crate::synthesizer::{PriorFailure, QuerySynthesizer};

/// Slack given to the database's own statement timeout before the
/// coordinator abandons the call.
const EXECUTION_GRACE: Duration = Duration::from_secs(1);

/// Failure code for a blank question.
pub const EMPTY_QUESTION: &str = "empty-question";

/// Budgets and time limits for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorLimits {
    /// Initial retrieval budget in tokens.
    pub token_budget: usize,
    /// Budget multiplier applied after an `unknown-entity` rejection.
    pub retry_budget_multiplier: f64,
    /// Upper bound for widened budgets.
    pub max_token_budget: usize,
    /// Limit for question embedding plus index search.
    pub retrieval_timeout: Duration,
    /// Limit for one generator call.
    pub generator_timeout: Duration,
    /// Row and time limits passed to the database.
    pub execution: ExecutionLimits,
}

impl Default for CoordinatorLimits {
    fn default() -> Self {
        Self::from(&NexusSettings::default())
    }
}

impl From<&NexusSettings> for CoordinatorLimits {
    fn from(settings: &NexusSettings) -> Self {
        Self {
            token_budget: settings.retrieval.token_budget,
            retry_budget_multiplier: settings.retrieval.retry_budget_multiplier,
            max_token_budget: settings.retrieval.max_token_budget,
            retrieval_timeout: Duration::from_millis(
                settings.pipeline.embed_timeout_ms + settings.pipeline.search_timeout_ms,
            ),
            generator_timeout: Duration::from_millis(settings.generator.timeout_ms),
            execution: ExecutionLimits {
                max_rows: settings.database.max_rows,
                timeout: Duration::from_millis(settings.database.statement_timeout_ms),
            },
        }
    }
}

impl CoordinatorLimits {
    /// Budget for the next retrieval after a rejection at `current`, or
    /// `None` when it would not grow.
    pub fn widened_budget(&self, current: usize) -> Option<usize> {
        if self.retry_budget_multiplier.is_nan() || self.retry_budget_multiplier <= 1.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (current as f64 * self.retry_budget_multiplier).ceil() as usize;
        let next = scaled.min(self.max_token_budget);
        (next > current).then_some(next)
    }
}

/// Session state between steps.
#[derive(Debug)]
enum Phase {
    Retrieving { budget: usize },
    Synthesizing,
    Validating { sql: String },
    Executing { sql: String },
    Failed { error: AttemptError, sql: Option<String> },
    RetryPending { widen: bool, retrieve: bool },
    Finished(TerminalStatus, Option<SessionFailure>),
}

/// Runs sessions against one retriever, synthesizer, validator and database.
pub struct ExecutionCoordinator {
    retriever: ContextRetriever,
    synthesizer: QuerySynthesizer,
    validator: GuardrailValidator,
    database: Arc<dyn Database>,
    limits: CoordinatorLimits,
}

impl ExecutionCoordinator {
    /// Assemble a coordinator.
    pub fn new(
        retriever: ContextRetriever,
        synthesizer: QuerySynthesizer,
        validator: GuardrailValidator,
        database: Arc<dyn Database>,
        limits: CoordinatorLimits,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            validator,
            database,
            limits,
        }
    }

    /// Configured limits.
    pub fn limits(&self) -> &CoordinatorLimits {
        &self.limits
    }

    /// Drive `session` to a terminal state with at most `max_attempts`
    /// attempts.
    pub async fn run(&self, session: QuerySession, max_attempts: u32) -> QuerySession {
        self.run_with_cancel(session, max_attempts, &CancellationToken::new()).await
    }

    /// [`ExecutionCoordinator::run`] under a cancellation token. A cancelled
    /// session ends `rejected` with code `cancelled`.
    #[instrument(skip_all, fields(session_id = %session.id(), attempt = tracing::field::Empty))]
    pub async fn run_with_cancel(
        &self,
        mut session: QuerySession,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> QuerySession {
        if session.is_terminal() {
            debug!("session already terminal");
            return session;
        }
        let max_attempts = max_attempts.max(1);
        let started = Instant::now();

        let mut phase = if session.question().trim().is_empty() {
            Phase::Finished(
                TerminalStatus::Rejected,
                Some(SessionFailure {
                    code: EMPTY_QUESTION.to_string(),
                    message: "question is empty".to_string(),
                    last_sql: None,
                }),
            )
        } else {
            Phase::Retrieving {
                budget: self.limits.token_budget,
            }
        };
        let mut budget = self.limits.token_budget;
        let mut current: Option<(Attempt, Instant)> = None;
        let mut prior: Option<(Option<String>, AttemptError)> = None;

        loop {
            if current.is_none() && !matches!(phase, Phase::Finished(..)) {
                let number = u32::try_from(session.attempt_count())
                    .unwrap_or(u32::MAX)
                    .saturating_add(1);
                let _ = Span::current().record("attempt", number);
                metrics::counter!(ATTEMPTS_TOTAL).increment(1);
                current = Some((Attempt::new(number), Instant::now()));
            }

            phase = match phase {
                Phase::Retrieving { budget: requested } => {
                    budget = requested;
                    let result = self
                        .bounded(
                            PipelineStep::Retrieval,
                            self.limits.retrieval_timeout,
                            cancel,
                            self.retriever.retrieve(session.question(), requested),
                        )
                        .await;
                    match result {
                        Ok(Ok(context)) => {
                            debug!(budget = requested, elements = context.len(), "context retrieved");
                            session.set_context(context);
                            Phase::Synthesizing
                        }
                        Ok(Err(e)) => Phase::Failed {
                            error: AttemptError::Backend {
                                step: PipelineStep::Retrieval,
                                message: e.to_string(),
                                retryable: e.is_retryable(),
                            },
                            sql: None,
                        },
                        Err(error) => Phase::Failed { error, sql: None },
                    }
                }

                Phase::Synthesizing => match session.context() {
                    None => Phase::Failed {
                        error: AttemptError::Backend {
                            step: PipelineStep::Retrieval,
                            message: "no retrieval context".to_string(),
                            retryable: false,
                        },
                        sql: None,
                    },
                    Some(context) => {
                        let prior_failure = prior.as_ref().map(|(sql, error)| PriorFailure {
                            sql: sql.as_deref(),
                            error,
                        });
                        let result = self
                            .bounded(
                                PipelineStep::Synthesis,
                                self.limits.generator_timeout,
                                cancel,
                                self.synthesizer
                                    .synthesize(session.question(), context, prior_failure.as_ref()),
                            )
                            .await;
                        match result {
                            Ok(Ok(sql)) => Phase::Validating { sql },
                            Ok(Err(e)) => {
                                let sql = e.sql().map(str::to_string);
                                Phase::Failed {
                                    error: synthesis_error(&e),
                                    sql,
                                }
                            }
                            Err(error) => Phase::Failed { error, sql: None },
                        }
                    }
                },

                Phase::Validating { sql } => {
                    let verdict = match session.context() {
                        Some(context) => self.validator.validate(&sql, context),
                        None => ValidationVerdict::rejected(
                            ReasonCode::UnknownEntity,
                            sql.clone(),
                            "no schema context was retrieved",
                        ),
                    };
                    if let Some((attempt, _)) = current.as_mut() {
                        attempt.sql = Some(sql.clone());
                        attempt.verdict = Some(verdict.clone());
                    }
                    match verdict {
                        ValidationVerdict::Accepted => Phase::Executing { sql },
                        ValidationVerdict::Rejected {
                            reason,
                            fragment,
                            message,
                        } => {
                            metrics::counter!(VALIDATION_REJECTIONS_TOTAL, "reason" => reason.as_str())
                                .increment(1);
                            warn!(%reason, %fragment, "candidate rejected");
                            Phase::Failed {
                                error: AttemptError::Validation {
                                    reason,
                                    fragment,
                                    message,
                                },
                                sql: Some(sql),
                            }
                        }
                    }
                }

                Phase::Executing { sql } => {
                    let result = self
                        .bounded(
                            PipelineStep::Execution,
                            self.limits.execution.timeout + EXECUTION_GRACE,
                            cancel,
                            self.database.execute(&sql, &self.limits.execution),
                        )
                        .await;
                    match result {
                        Ok(Ok(rows)) => {
                            debug!(rows = rows.rows.len(), "statement executed");
                            if let Some((attempt, _)) = current.as_mut() {
                                attempt.outcome = Some(ExecutionOutcome::Rows(rows));
                            }
                            Phase::Finished(TerminalStatus::Succeeded, None)
                        }
                        Ok(Err(db)) => {
                            metrics::counter!(EXECUTION_ERRORS_TOTAL, "code" => db.code.as_str())
                                .increment(1);
                            warn!(code = %db.code, error = %db.message, "statement failed");
                            if let Some((attempt, _)) = current.as_mut() {
                                attempt.outcome = Some(ExecutionOutcome::Error(db.clone()));
                            }
                            Phase::Failed {
                                error: AttemptError::Execution(db),
                                sql: Some(sql),
                            }
                        }
                        Err(error) => Phase::Failed {
                            error,
                            sql: Some(sql),
                        },
                    }
                }

                Phase::Failed { error, sql } => {
                    let made = session.attempt_count() + usize::from(current.is_some());
                    let failure = SessionFailure {
                        code: error.code().to_string(),
                        message: error.to_string(),
                        last_sql: sql.clone().or_else(|| session.final_sql().map(str::to_string)),
                    };
                    let next = if !error.is_retryable() {
                        Phase::Finished(TerminalStatus::Rejected, Some(failure))
                    } else if made >= max_attempts as usize {
                        Phase::Finished(TerminalStatus::ExhaustedRetries, Some(failure))
                    } else {
                        let widen = matches!(
                            error,
                            AttemptError::Validation {
                                reason: ReasonCode::UnknownEntity,
                                ..
                            }
                        );
                        let retrieve = error.step() == Some(PipelineStep::Retrieval)
                            || session.context().is_none();
                        Phase::RetryPending { widen, retrieve }
                    };
                    if let Some((mut attempt, at)) = current.take() {
                        attempt.error = Some(error.clone());
                        if attempt.sql.is_none() {
                            attempt.sql.clone_from(&sql);
                        }
                        attempt.duration_ms = elapsed_ms(at);
                        session.push_attempt(attempt);
                    }
                    if matches!(next, Phase::RetryPending { .. }) {
                        warn!(code = error.code(), error = %error, "attempt failed, retrying");
                    }
                    prior = Some((sql, error));
                    next
                }

                Phase::RetryPending { widen, retrieve } => match widen
                    .then(|| self.limits.widened_budget(budget))
                    .flatten()
                {
                    Some(wider) => {
                        debug!(from = budget, to = wider, "widening retrieval budget");
                        Phase::Retrieving { budget: wider }
                    }
                    None if retrieve => Phase::Retrieving { budget },
                    None => Phase::Synthesizing,
                },

                Phase::Finished(status, failure) => {
                    if let Some((mut attempt, at)) = current.take() {
                        attempt.duration_ms = elapsed_ms(at);
                        session.push_attempt(attempt);
                    }
                    let _ = session.finish(status, failure);
                    break;
                }
            };
        }

        let status = session.status().unwrap_or(TerminalStatus::Rejected);
        metrics::counter!(SESSIONS_TOTAL, "status" => status.as_str()).increment(1);
        metrics::histogram!(SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            status = status.as_str(),
            attempts = session.attempt_count(),
            code = session.failure().map(|f| f.code.as_str()),
            "session finished"
        );
        session
    }

    /// Run `future` under `limit` and `cancel`.
    async fn bounded<T>(
        &self,
        step: PipelineStep,
        limit: Duration,
        cancel: &CancellationToken,
        future: impl Future<Output = T>,
    ) -> Result<T, AttemptError> {
        tokio::select! {
            () = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(limit, future) => result.map_err(|_| {
                metrics::counter!(STEP_TIMEOUTS_TOTAL, "step" => step.as_str()).increment(1);
                warn!(step = step.as_str(), limit_ms = duration_ms(limit), "step timed out");
                AttemptError::Timeout {
                    step,
                    limit_ms: duration_ms(limit),
                }
            }),
        }
    }
}

fn synthesis_error(error: &SynthesisError) -> AttemptError {
    match (error, error.kind()) {
        (SynthesisError::Generator(g), _) => AttemptError::Backend {
            step: PipelineStep::Synthesis,
            message: g.to_string(),
            retryable: g.is_retryable(),
        },
        (_, Some(kind)) => {
            metrics::counter!(SYNTHESIS_FAILURES_TOTAL, "kind" => kind.to_string()).increment(1);
            AttemptError::Synthesis {
                kind,
                message: error.to_string(),
            }
        }
        (_, None) => AttemptError::Backend {
            step: PipelineStep::Synthesis,
            message: error.to_string(),
            retryable: true,
        },
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn elapsed_ms(since: Instant) -> u64 {
    duration_ms(since.elapsed())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_multiplier_never_widens() {
        let limits = CoordinatorLimits::default();
        assert!((limits.retry_budget_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(limits.widened_budget(limits.token_budget), None);
    }

    #[test]
    fn widening_is_capped() {
        let limits = CoordinatorLimits {
            token_budget: 1000,
            retry_budget_multiplier: 1.5,
            max_token_budget: 1200,
            ..CoordinatorLimits::default()
        };
        assert_eq!(limits.widened_budget(100), Some(150));
        assert_eq!(limits.widened_budget(1000), Some(1200));
        assert_eq!(limits.widened_budget(1200), None);
    }

    #[test]
    fn limits_follow_settings() {
        let mut settings = NexusSettings::default();
        settings.database.max_rows = 7;
        settings.pipeline.embed_timeout_ms = 100;
        settings.pipeline.search_timeout_ms = 50;
        let limits = CoordinatorLimits::from(&settings);
        assert_eq!(limits.execution.max_rows, 7);
        assert_eq!(limits.retrieval_timeout, Duration::from_millis(150));
    }
}

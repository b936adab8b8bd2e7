//! Metric names recorded through the `metrics` facade.
//!
//! No recorder is installed by the library; embedding applications choose
//! one. Without a recorder every call is a no-op.

/// Sessions finished, labelled by `status`.
pub const SESSIONS_TOTAL: &str = "nq_sessions_total";

/// Attempts started.
pub const ATTEMPTS_TOTAL: &str = "nq_attempts_total";

/// Guardrail rejections, labelled by `reason`.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "nq_validation_rejections_total";

/// Synthesis failures, labelled by `kind`.
pub const SYNTHESIS_FAILURES_TOTAL: &str = "nq_synthesis_failures_total";

/// Database execution errors, labelled by `code`.
pub const EXECUTION_ERRORS_TOTAL: &str = "nq_execution_errors_total";

/// Step timeouts, labelled by `step`.
pub const STEP_TIMEOUTS_TOTAL: &str = "nq_step_timeouts_total";

/// Session wall-clock duration.
pub const SESSION_DURATION_SECONDS: &str = "nq_session_duration_seconds";

/// Crawl wall-clock duration.
pub const CRAWL_DURATION_SECONDS: &str = "nq_crawl_duration_seconds";

/// Elements written by crawls, labelled by `change` (`added` / `changed`).
pub const CRAWL_UPSERTS_TOTAL: &str = "nq_crawl_upserts_total";

/// Elements retired by crawls.
pub const CRAWL_RETIRES_TOTAL: &str = "nq_crawl_retires_total";

/// Failed crawls.
pub const CRAWL_FAILURES_TOTAL: &str = "nq_crawl_failures_total";

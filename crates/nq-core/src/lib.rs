//! # nq-core
//!
//! Shared vocabulary for the NexusQuery engine.
//!
//! - **Schema**: [`SchemaElement`] (one table or column) and [`SchemaCatalog`]
//!   (one consistent catalog read)
//! - **Retrieval**: [`RetrievalContext`], the token-bounded schema subset
//!   disclosed to the generator for one question
//! - **Sessions**: [`QuerySession`] and its [`Attempt`] history
//! - **Outcomes**: [`ValidationVerdict`] and [`ExecutionOutcome`]
//! - **Utilities**: token estimation, UTF-8 safe truncation, tracing setup

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod logging;
pub mod outcome;
pub mod schema;
pub mod session;
pub mod text;
pub mod tokens;

pub use context::{ContextEntry, RetrievalContext};
pub use errors::{CoreError, Result};
pub use outcome::{
    DatabaseError, DbErrorCode, ExecutionOutcome, ReasonCode, ResultColumn, ResultSet,
    ValidationVerdict, ValueKind,
};
pub use schema::{ElementKind, ForeignKeyRef, SchemaCatalog, SchemaElement};
pub use session::{
    Attempt, AttemptError, PipelineStep, QuerySession, SessionFailure, SynthesisFailureKind,
    TerminalStatus,
};

//! # nq-llm
//!
//! SQL generation backends.
//!
//! - [`Generator`]: single round-trip completion capability
//! - [`OpenAiCompatGenerator`]: `/chat/completions` client for Groq, `OpenAI`
//!   and compatible servers
//! - [`mock::ScriptedGenerator`]: deterministic test double

#![deny(unsafe_code)]

pub mod generator;
pub mod mock;
pub mod openai;

pub use generator::{CompletionOptions, Generator, GeneratorError, GeneratorResult};
pub use openai::OpenAiCompatGenerator;

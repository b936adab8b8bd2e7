//! # nq-cli
//!
//! `nexusquery` binary: loads settings, wires the engine and runs one
//! command (index, ask, schema, or watch).

#![deny(unsafe_code)]

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nq_catalog::CatalogReader;
use nq_core::TerminalStatus;
use nq_engine::{EngineComponents, QueryEngine};
use nq_settings::NexusSettings;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Ask questions about a SQL database in plain language.
#[derive(Parser, Debug)]
#[command(name = "nexusquery", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.nexusquery/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target `SQLite` database (overrides `database.path`).
    #[arg(long, global = true)]
    database: Option<String>,

    /// Log level or filter directive (overrides `logging.level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the schema into the vector index.
    Index {
        /// Clear the index and re-embed every element.
        #[arg(long)]
        rebuild: bool,
    },
    /// Answer a question with one read-only query.
    Ask {
        /// The question.
        question: String,
        /// Print the whole session as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the catalog as the engine reads it.
    Schema,
    /// Re-crawl the schema periodically until interrupted.
    Watch,
}

fn load(cli: &Cli) -> Result<NexusSettings> {
    let mut settings = match &cli.config {
        Some(path) => nq_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => nq_settings::load_settings().context("Failed to load settings")?,
    };
    if let Some(database) = &cli.database {
        settings.database.path = Some(database.clone());
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    nq_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let _ = nq_settings::init_settings(settings);
    let settings = nq_settings::get_settings();

    let components = EngineComponents::from_settings(settings).context("Failed to set up engine")?;

    match cli.command {
        Command::Schema => {
            let catalog = components
                .catalog
                .read_catalog()
                .await
                .context("Failed to read catalog")?;
            print!("{}", output::format_catalog(&catalog));
            Ok(ExitCode::SUCCESS)
        }
        Command::Index { rebuild } => {
            let engine = QueryEngine::new(components, settings);
            let indexer = engine.indexer();
            let report = if rebuild {
                indexer.rebuild().await
            } else {
                indexer.crawl().await
            }
            .context("Index update failed")?;
            println!("{}", output::format_report(&report));
            Ok(ExitCode::SUCCESS)
        }
        Command::Ask { question, json } => {
            let engine = QueryEngine::new(components, settings);
            let cancel = CancellationToken::new();
            let session = tokio::select! {
                session = engine.ask_with_cancel(&question, &cancel) => session,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    anyhow::bail!("interrupted");
                }
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&session).context("Failed to encode session")?
                );
            } else {
                println!("{}", output::format_session(&session));
            }
            Ok(if session.status() == Some(TerminalStatus::Succeeded) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Watch => {
            let engine = QueryEngine::new(components, settings);
            let interval = Duration::from_secs(settings.index.crawl_interval_secs.max(1));
            let cancel = CancellationToken::new();
            let handle = engine.indexer().spawn_periodic(interval, cancel.clone());
            info!(interval_secs = interval.as_secs(), "watching schema, Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            info!("Shutting down...");
            cancel.cancel();
            let _ = handle.await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nexusquery",
            "ask",
            "how many orders?",
            "--json",
            "--database",
            "/tmp/shop.db",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("/tmp/shop.db"));
        assert!(matches!(cli.command, Command::Ask { json: true, .. }));
    }

    #[test]
    fn flags_override_loaded_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"database": {"path": "/from/file.db"}, "pipeline": {"maxAttempts": 4}}"#)
            .unwrap();
        let cli = Cli::try_parse_from([
            "nexusquery",
            "--config",
            path.to_str().unwrap(),
            "--database",
            "/from/flag.db",
            "--log-level",
            "debug",
            "schema",
        ])
        .unwrap();
        let settings = load(&cli).unwrap();
        assert_eq!(settings.database.path.as_deref(), Some("/from/flag.db"));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.pipeline.max_attempts, 4);
    }
}

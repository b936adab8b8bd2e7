//! # nq-settings
//!
//! Layered configuration for NexusQuery.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`NexusSettings::default()`]
//! 2. **User file**: `~/.nexusquery/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `NQ_*` overrides
//!
//! ```no_run
//! use nq_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("token budget: {}", settings.retrieval.token_budget);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, expand_home, home_dir, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<NexusSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads from the default path; on failure the compiled
/// defaults are used and the error is logged.
pub fn get_settings() -> &'static NexusSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            NexusSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: NexusSettings) -> std::result::Result<(), NexusSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`NexusSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `NQ_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{EmbeddingProvider, NexusSettings, SqlDialectKind};

/// Directory holding settings and the default index (`~/.nexusquery`).
pub fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nexusquery")
}

/// Resolve the path to the settings file (`~/.nexusquery/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<NexusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<NexusSettings> {
    let defaults = serde_json::to_value(NexusSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: NexusSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives from `source` replace
/// `target`, and nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `NQ_*` environment overrides.
///
/// Invalid values are logged and ignored, keeping the file or default value.
pub fn apply_env_overrides(settings: &mut NexusSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, so tests need not touch the
/// process environment.
pub fn apply_overrides_from(settings: &mut NexusSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = env.string("NQ_DATABASE_PATH") {
        settings.database.path = Some(v);
    }
    if let Some(v) = env.usize("NQ_MAX_ROWS", 1, 10_000_000) {
        settings.database.max_rows = v;
    }
    if let Some(v) = env.u64("NQ_STATEMENT_TIMEOUT_MS", 10, 3_600_000) {
        settings.database.statement_timeout_ms = v;
    }

    // ── Index ───────────────────────────────────────────────────────
    if let Some(v) = env.string("NQ_INDEX_PATH") {
        settings.index.path = v;
    }
    if let Some(v) = env.u64("NQ_CRAWL_INTERVAL_SECS", 1, 86_400) {
        settings.index.crawl_interval_secs = v;
    }
    if let Some(v) = env.string("NQ_EMBEDDING_PROVIDER") {
        match serde_json::from_value::<EmbeddingProvider>(Value::String(v.clone())) {
            Ok(provider) => settings.embedding.provider = provider,
            Err(_) => warn!(key = "NQ_EMBEDDING_PROVIDER", value = %v, "unknown provider, ignoring"),
        }
    }

    // ── Retrieval / generation ──────────────────────────────────────
    if let Some(v) = env.usize("NQ_TOKEN_BUDGET", 1, 1_000_000) {
        settings.retrieval.token_budget = v;
        settings.retrieval.max_token_budget = settings.retrieval.max_token_budget.max(v);
    }
    if let Some(v) = env.string("NQ_GENERATOR_BASE_URL") {
        settings.generator.base_url = v;
    }
    if let Some(v) = env.string("NQ_GENERATOR_MODEL") {
        settings.generator.model = v;
    }

    // ── Pipeline ────────────────────────────────────────────────────
    if let Some(v) = env.usize("NQ_MAX_ATTEMPTS", 1, 20) {
        settings.pipeline.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.string("NQ_SQL_DIALECT") {
        match serde_json::from_value::<SqlDialectKind>(Value::String(v.to_lowercase())) {
            Ok(dialect) => settings.pipeline.sql_dialect = dialect,
            Err(_) => warn!(key = "NQ_SQL_DIALECT", value = %v, "unknown dialect, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("NQ_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("NQ_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 2}, "b": [1, 2]}),
            json!({"a": {"y": 3}, "b": [9], "c": null}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 3}, "b": [9]}));
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.retrieval.candidate_limit, 64);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"database": {"path": "/data/shop.db", "maxRows": 50}, "logging": {"json": true}}"#,
        )
        .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.database.path.as_deref(), Some("/data/shop.db"));
        assert_eq!(s.database.max_rows, 50);
        assert_eq!(s.database.statement_timeout_ms, 10_000);
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_are_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"pipeline": {"maxAttempts": 0}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = NexusSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("NQ_DATABASE_PATH", "/tmp/x.db"),
                ("NQ_MAX_ATTEMPTS", "3"),
                ("NQ_SQL_DIALECT", "Postgres"),
                ("NQ_EMBEDDING_PROVIDER", "http"),
                ("NQ_LOG_JSON", "yes"),
                ("NQ_TOKEN_BUDGET", "5000"),
            ]),
        );
        assert_eq!(s.database.path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(s.pipeline.max_attempts, 3);
        assert_eq!(s.pipeline.sql_dialect, SqlDialectKind::Postgres);
        assert_eq!(s.embedding.provider, EmbeddingProvider::Http);
        assert!(s.logging.json);
        assert_eq!(s.retrieval.token_budget, 5000);
        assert_eq!(s.retrieval.max_token_budget, 5000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = NexusSettings::default();
        apply_overrides_from(
            &mut s,
            env(&[
                ("NQ_MAX_ATTEMPTS", "0"),
                ("NQ_MAX_ROWS", "lots"),
                ("NQ_SQL_DIALECT", "oracle"),
                ("NQ_LOG_JSON", "maybe"),
                ("NQ_INDEX_PATH", ""),
            ]),
        );
        assert_eq!(s, NexusSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }

    #[test]
    fn expand_home_only_prefix() {
        assert_eq!(expand_home("/abs/path.db"), PathBuf::from("/abs/path.db"));
        assert!(expand_home("~/index.db").ends_with("index.db"));
        assert!(!expand_home("~/index.db").starts_with("~"));
    }
}

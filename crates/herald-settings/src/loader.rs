//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HeraldSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{HeraldSettings, LogFormat};

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "HERALD_SETTINGS";

/// Resolve the settings file: `$HERALD_SETTINGS`, else `~/.herald/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HeraldSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the
/// file contains invalid JSON or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; invalid values are ignored with a
/// warning and the file/default value is kept:
///
/// | variable | field | range |
/// |---|---|---|
/// | `PORT` | `server.port` | 1–65535 |
/// | `HERALD_HOST` | `server.host` | non-empty |
/// | `HERALD_MAX_CONNECTIONS` | `server.maxConnections` | 1–1 000 000 |
/// | `HERALD_HEARTBEAT_INTERVAL_SECS` | `server.heartbeatIntervalSecs` | 1–3600 |
/// | `HERALD_HEARTBEAT_TIMEOUT_SECS` | `server.heartbeatTimeoutSecs` | 1–86400 |
/// | `HERALD_SEND_QUEUE` | `server.sendQueueCapacity` | 1–65536 |
/// | `HERALD_LOG_LEVEL` | `logging.level` | non-empty |
/// | `HERALD_LOG_FORMAT` | `logging.format` | `compact` / `json` |
pub fn apply_overrides<F>(settings: &mut HeraldSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.usize("HERALD_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("HERALD_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("HERALD_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.usize("HERALD_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue_capacity = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("HERALD_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "HERALD_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.string(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> HeraldSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = HeraldSettings::default();
        apply_overrides(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 4000, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── read_settings_file ──────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/herald/settings.json");
        let settings = read_settings_file(path).unwrap();
        assert_eq!(settings.server.port, 4000);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090, "maxConnections": 8}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.max_connections, 8);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = read_settings_file(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        assert!(read_settings_file(&path).is_err());
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"sendQueueCapacity": 0}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn port_override() {
        let settings = overrides(&[("PORT", "8123")]);
        assert_eq!(settings.server.port, 8123);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        assert_eq!(overrides(&[("PORT", "not-a-port")]).server.port, 4000);
        assert_eq!(overrides(&[("PORT", "0")]).server.port, 4000);
        assert_eq!(overrides(&[("PORT", "70000")]).server.port, 4000);
    }

    #[test]
    fn server_overrides() {
        let settings = overrides(&[
            ("HERALD_HOST", "127.0.0.1"),
            ("HERALD_MAX_CONNECTIONS", "10"),
            ("HERALD_HEARTBEAT_INTERVAL_SECS", "5"),
            ("HERALD_HEARTBEAT_TIMEOUT_SECS", "15"),
            ("HERALD_SEND_QUEUE", "32"),
        ]);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.max_connections, 10);
        assert_eq!(settings.server.heartbeat_interval_secs, 5);
        assert_eq!(settings.server.heartbeat_timeout_secs, 15);
        assert_eq!(settings.server.send_queue_capacity, 32);
    }

    #[test]
    fn empty_values_are_ignored() {
        let settings = overrides(&[("HERALD_HOST", ""), ("HERALD_LOG_LEVEL", "  ")]);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn logging_overrides() {
        let settings = overrides(&[("HERALD_LOG_LEVEL", "debug"), ("HERALD_LOG_FORMAT", "json")]);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_log_format_ignored() {
        let settings = overrides(&[("HERALD_LOG_FORMAT", "xml")]);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range(" 80 ", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("30", 1, 3600), Some(30));
        assert_eq!(parse_u64_range("0", 1, 3600), None);
        assert_eq!(parse_u64_range("abc", 1, 3600), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }
}

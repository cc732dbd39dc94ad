//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `BLE2WS_*` environment overrides (highest priority)
//!
//! CLI flags are applied by the binary after loading.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogFormat, Settings};

/// Resolve the default settings file (`~/.ble2ws/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ble2ws").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults; an unreadable file or invalid JSON
/// is an error. The result is validated.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

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
///
/// Objects merge per key, arrays and primitives are replaced by `source`,
/// and `null` in `source` keeps the target value.
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

/// Apply `BLE2WS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Numbers must parse and fall within range; invalid values are logged and
/// ignored so the file or default value stays in effect.
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BLE2WS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("BLE2WS_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("BLE2WS_MAX_CONNECTIONS", 1, 100_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("BLE2WS_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("BLE2WS_HEARTBEAT_TIMEOUT_MS", 1000, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("BLE2WS_SCAN_TIMEOUT_MS", 100, 600_000) {
        settings.bridge.default_scan_timeout_ms = v;
    }
    if let Some(v) = env.u64("BLE2WS_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.bridge.default_connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("BLE2WS_REQUEST_TIMEOUT_MS", 100, 3_600_000) {
        settings.bridge.request_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BLE2WS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(raw) = env.string("BLE2WS_LOG_FORMAT") {
        match LogFormat::parse(&raw) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "BLE2WS_LOG_FORMAT", value = %raw, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────

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

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, |v| parse_usize_range(v, min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8765, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let merged = deep_merge(target, serde_json::json!({"items": [4]}));
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "bridge": {"cacheTtlMs": 1000}, "logging": {"format": "json"}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.bridge.cache_ttl_ms, 1000);
        assert_eq!(settings.bridge.request_timeout_ms, 60_000);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(read_settings_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_combination_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 60000, "heartbeatTimeoutMs": 30000}}"#,
        )
        .unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("BLE2WS_HOST", "0.0.0.0"),
                ("BLE2WS_PORT", "9100"),
                ("BLE2WS_REQUEST_TIMEOUT_MS", "5000"),
                ("BLE2WS_LOG_FORMAT", "JSON"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.bridge.request_timeout_ms, 5000);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn out_of_range_overrides_ignored() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("BLE2WS_PORT", "0"),
                ("BLE2WS_MAX_CONNECTIONS", "lots"),
                ("BLE2WS_LOG_FORMAT", "xml"),
                ("BLE2WS_HOST", ""),
            ]),
        );
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn range_parsers() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range(" 500 ", 100, 1000), Some(500));
        assert_eq!(parse_u64_range("50", 100, 1000), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If `~/.dispatcher/client.json` exists, deep-merge it over the defaults
//! 3. Apply `DISPATCHER_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ClientSettings;

/// Resolve the path to the settings file (`~/.dispatcher/client.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dispatcher").join("client.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ClientSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply overrides read through `lookup` (normally `std::env::var`).
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("DISPATCHER_HOST") {
        settings.host = v;
    }
    if let Some(v) = env.u64_in("DISPATCHER_PORT", 1, 65_535) {
        // range-checked above
        settings.port = u16::try_from(v).unwrap_or(settings.port);
    }
    if let Some(v) = env.string("DISPATCHER_SOCKET_PATH") {
        settings.socket_path = v;
    }
    if let Some(v) = env.u64_in("DISPATCHER_CALL_TIMEOUT_MS", 1, 3_600_000) {
        settings.call_timeout_ms = v;
    }
    if let Some(v) = env.u64_in("DISPATCHER_CONNECT_TIMEOUT_MS", 1, 600_000) {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = env.usize_in("DISPATCHER_EVENT_BUFFER", 1, 1_000_000) {
        settings.event_buffer_size = v;
    }
    if let Some(v) = env.string("DISPATCHER_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = env.usize_in("DISPATCHER_ENTITY_MAX_SIZE", 1, 10_000_000) {
        settings.entity.max_size = v;
    }
    if let Some(v) = env.bool("DISPATCHER_FETCH_INITIAL_SNAPSHOT") {
        settings.entity.fetch_initial_snapshot = v;
    }
}

fn validate(settings: &ClientSettings) -> Result<()> {
    let invalid = |field, reason: &str| SettingsError::Invalid {
        field,
        reason: reason.to_owned(),
    };
    if settings.call_timeout_ms == 0 {
        return Err(invalid("callTimeoutMs", "must be positive"));
    }
    if settings.event_buffer_size == 0 {
        return Err(invalid("eventBufferSize", "must be positive"));
    }
    if !settings.socket_path.starts_with('/') {
        return Err(invalid(
            "socketPath",
            &format!("must start with '/', got {:?}", settings.socket_path),
        ));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn usize_in(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

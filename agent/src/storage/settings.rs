//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::logs::LogLevel;

/// Read access to dotted settings keys.
///
/// Callers always pass the default; a missing or malformed value resolves to
/// it.
pub trait SettingsProvider: Send + Sync {
    /// Raw value, `None` when unset
    fn get(&self, key: &str) -> Option<String>;

    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    warn!("Setting {} has non-boolean value {:?}, using {}", key, raw, default);
                    default
                }
            },
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Setting {} has non-integer value {:?}, using {}", key, raw, default);
                default
            }),
        }
    }

    fn get_float(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => value,
                _ => {
                    warn!("Setting {} has non-numeric value {:?}, using {}", key, raw, default);
                    default
                }
            },
        }
    }
}

/// Daemon settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling log files; no file output when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable the periodic update checker
    #[serde(default = "default_true")]
    pub enable_checker: bool,

    /// Enable restart supervision
    #[serde(default = "default_true")]
    pub enable_restarter: bool,

    /// Enable the rollout worker
    #[serde(default = "default_true")]
    pub enable_rollout: bool,

    /// Dotted keys such as `check.concurrency_limit`
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            enable_checker: true,
            enable_restarter: true,
            enable_rollout: true,
            values: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Set a dotted key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`Settings::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Apply `--key=value` overrides for known dotted keys
    pub fn apply_overrides<'a>(&mut self, overrides: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in overrides {
            if key.contains('.') {
                self.set(key.clone(), Value::String(value.clone()));
            }
        }
    }
}

impl SettingsProvider for Settings {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

//! Engine configuration.
//!
//! Loaded from a JSON file. Before deserialisation the raw document gets
//! an environment pass: `${VAR}` substrings are substituted from the
//! process environment, and a string that is exactly one placeholder is
//! re-parsed so numeric and boolean values keep their native type
//! (`"${PORT}"` with `PORT=3000` becomes the number `3000`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub plugins: HashMap<String, PluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: None,
            cors: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_actions_root")]
    pub actions: PathBuf,
    #[serde(default = "default_flux_root")]
    pub flux: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            actions: default_actions_root(),
            flux: default_flux_root(),
        }
    }
}

fn default_actions_root() -> PathBuf {
    PathBuf::from("actions")
}

fn default_flux_root() -> PathBuf {
    PathBuf::from("flux")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One entry under `plugins`: the `type` discriminator selects the
/// implementation; everything else is handed to the plugin's `setup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// Cross-origin settings for the HTTP surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<CorsOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    Any(bool),
    One(String),
    Many(Vec<String>),
}

/// Read, env-interpolate, and deserialise the config file at `path`.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut doc: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    interpolate_env(&mut doc);
    serde_json::from_value(doc).map_err(|e| ConfigError::Invalid {
        message: e.to_string(),
    })
}

/// Substitute `${VAR}` placeholders throughout a JSON document from the
/// process environment. Missing variables resolve to the empty string
/// with a warning.
pub fn interpolate_env(value: &mut Value) {
    substitute(value, &|name| std::env::var(name).ok())
}

fn substitute(value: &mut Value, env: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if let Some(replaced) = substitute_str(s, env) {
                *value = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, env);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute(v, env);
            }
        }
        _ => {}
    }
}

/// Returns the replacement value, or `None` when the string holds no
/// placeholder and can stay as-is.
fn substitute_str(s: &str, env: &dyn Fn(&str) -> Option<String>) -> Option<Value> {
    if !s.contains("${") {
        return None;
    }

    // Full-placeholder strings keep native scalar types.
    if let Some(name) = s
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|inner| !inner.contains('}') && !inner.contains("${"))
    {
        let raw = lookup_env(name.trim(), env);
        return Some(parse_scalar(&raw));
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup_env(after[..end].trim(), env));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Some(Value::String(out))
}

fn lookup_env(name: &str, env: &dyn Fn(&str) -> Option<String>) -> String {
    match env(name) {
        Some(v) => v,
        None => {
            tracing::warn!(variable = name, "environment variable not set, using empty string");
            String::new()
        }
    }
}

/// Re-parse a substituted full placeholder: numbers and booleans keep
/// their native type, anything else stays a string.
fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

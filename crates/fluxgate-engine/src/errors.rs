//! Error types for all fluxgate subsystem operations.

use serde_json::{json, Value};
use thiserror::Error;

/// A single structural problem found while validating a flux definition.
///
/// `path` is a dotted location into the document (`flow[2].then[0].path`)
/// and `message` a human-readable description. The validator collects every
/// violation it finds rather than stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors raised by user-provided action handlers.
///
/// Carries the message surfaced to `catch` blocks (bound under `errorVar`
/// as `{"message": …}`) and an optional structured payload.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub details: Option<Value>,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Failures that unwind through flow execution.
///
/// Only a `try` node catches these; anything that escapes the flow is
/// converted by the executor into an opaque `500` response.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("action not found: {path}")]
    ActionNotFound { path: String },
    #[error("action '{name}' failed: {source}")]
    Action {
        name: String,
        #[source]
        source: ActionError,
    },
}

impl FlowError {
    /// The JSON value bound under a `try` node's `errorVar`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::ActionNotFound { path } => {
                json!({ "message": format!("Action not found: {path}") })
            }
            Self::Action { source, .. } => match &source.details {
                Some(details) => json!({ "message": source.message, "details": details }),
                None => json!({ "message": source.message }),
            },
        }
    }
}

/// Errors from [`Plugin`](crate::plugins::Plugin) lifecycle operations.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin type '{kind}' for '{key}'")]
    UnknownType { key: String, kind: String },
    #[error("plugin '{name}' setup failed: {message}")]
    Setup { name: String, message: String },
    #[error("plugin '{name}' teardown failed: {message}")]
    Teardown { name: String, message: String },
    #[error("plugin '{name}' has no client (setup has not completed)")]
    NotReady { name: String },
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Errors from engine assembly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

//! Fluxgate — declarative HTTP orchestration.
//!
//! Operators describe an endpoint as a JSON *flux*: a directed flow of
//! actions, conditions, loops, parallel fan-out, try/catch, and return
//! nodes. This crate loads and validates those definitions, resolves
//! `${…}` expressions against a per-request context, and interprets the
//! flow — actions do the imperative work, plugins carry shared adapters
//! (databases, HTTP clients) into every request.
//!
//! The crate is embeddable: it has no opinion about the HTTP server.
//! `fluxgate-server` binds loaded definitions to axum routes.

pub mod actions;
pub mod condition;
pub mod config;
pub mod context;
pub mod dylib;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod interpolate;
pub mod loader;
pub mod plugins;
pub mod types;
pub mod validate;

// Re-export the public surface at the crate level.

// actions
pub use actions::{ActionHandler, ActionRegistry};

// condition
pub use condition::{evaluate_condition, ConditionError};

// config
pub use config::{
    load_config, CorsConfig, CorsOrigin, EngineConfig, LogLevel, LoggingConfig, PathsConfig,
    PluginConfig, ServerConfig,
};

// context
pub use context::{FlowContext, PluginClient, RequestMeta, ResponseOut};

// engine
pub use engine::{Engine, EngineBuilder};

// errors
pub use errors::{
    ActionError, ConfigError, EngineError, FlowError, PluginError, Violation,
};

// executor
pub use executor::{Executor, ExecutorConfig};

// interpolate
pub use interpolate::{resolve, resolve_str, truthy};

// loader
pub use loader::{FluxFileError, Loader};

// plugins
pub use plugins::{HttpPlugin, Plugin, PluginFactory, PluginRegistry};

// types
pub use types::{FlowNode, FluxDef, HttpMethod};

// validate
pub use validate::validate_flux;

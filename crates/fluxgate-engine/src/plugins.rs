//! Plugin lifecycle and registry.
//!
//! A plugin is an external adapter (database, cache, outbound HTTP) with
//! an async setup/teardown lifecycle and an opaque client injected into
//! every request context under `plugins[name]`. The registry enforces the
//! lifecycle contract: every plugin is setup-complete before any endpoint
//! is registered, and teardown runs exactly once at shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::{FlowContext, PluginClient};
use crate::errors::PluginError;

/// The lifecycle contract every plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The logical key the plugin is injected under (`database`, `http`).
    fn name(&self) -> &str;

    /// Prepare the plugin (open pools, authenticate). A failure here
    /// aborts engine startup.
    async fn setup(&self, config: &Value) -> Result<(), PluginError>;

    /// Release resources. Called exactly once at shutdown.
    async fn teardown(&self) -> Result<(), PluginError>;

    /// The opaque client injected into request contexts. Must fail if
    /// called before a successful [`setup`](Plugin::setup).
    fn client(&self) -> Result<PluginClient, PluginError>;
}

/// Constructor for a plugin implementation, keyed by the config `type`
/// discriminator. Receives the logical key from the config.
pub type PluginFactory = Arc<dyn Fn(&str) -> Arc<dyn Plugin> + Send + Sync>;

/// Holds every configured plugin and drives its lifecycle.
pub struct PluginRegistry {
    /// `(logical key, setup config, plugin)` in configuration order.
    plugins: Vec<(String, Value, Arc<dyn Plugin>)>,
    ready: AtomicBool,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.iter().map(|(k, _, _)| k).collect::<Vec<_>>())
            .field("ready", &self.ready)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl PluginRegistry {
    /// Instantiate plugins from the config's `plugins` section.
    ///
    /// `factories` maps `type` discriminators to constructors; the
    /// built-in `http` type is always available. An unknown type aborts
    /// startup.
    pub fn from_config(
        configs: &HashMap<String, crate::config::PluginConfig>,
        factories: &HashMap<String, PluginFactory>,
        extra: Vec<Arc<dyn Plugin>>,
    ) -> Result<Self, PluginError> {
        let mut plugins: Vec<(String, Value, Arc<dyn Plugin>)> = Vec::new();

        // Deterministic setup order regardless of map iteration.
        let mut keys: Vec<&String> = configs.keys().collect();
        keys.sort();

        for key in keys {
            let cfg = &configs[key];
            let plugin: Arc<dyn Plugin> = match factories.get(&cfg.kind) {
                Some(factory) => factory(key),
                None if cfg.kind == "http" => Arc::new(HttpPlugin::new(key)),
                None => {
                    return Err(PluginError::UnknownType {
                        key: key.clone(),
                        kind: cfg.kind.clone(),
                    })
                }
            };
            plugins.push((key.clone(), Value::Object(cfg.options.clone()), plugin));
        }

        for plugin in extra {
            let key = plugin.name().to_string();
            plugins.push((key, Value::Object(Default::default()), plugin));
        }

        Ok(Self {
            plugins,
            ready: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        })
    }

    /// An empty registry, for engines without plugins.
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
            ready: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Run `setup` for every plugin, in order. The first failure aborts
    /// with the error surfaced; no endpoint may be registered until this
    /// returns `Ok`.
    pub async fn setup_all(&self) -> Result<(), PluginError> {
        for (key, config, plugin) in &self.plugins {
            tracing::info!(plugin = %key, "setting up plugin");
            plugin.setup(config).await?;
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether every plugin completed setup.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Run `teardown` for every plugin, exactly once. Errors are logged,
    /// never rethrown; later calls are no-ops.
    pub async fn teardown_all(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for (key, _, plugin) in &self.plugins {
            if let Err(e) = plugin.teardown().await {
                tracing::error!(plugin = %key, error = %e, "plugin teardown failed");
            }
        }
    }

    /// Copy `name → client` into a request context.
    pub fn inject(&self, ctx: &FlowContext) -> Result<(), PluginError> {
        let mut clients = HashMap::with_capacity(self.plugins.len());
        for (key, _, plugin) in &self.plugins {
            clients.insert(key.clone(), plugin.client()?);
        }
        ctx.set_plugins(clients);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|(k, _, _)| k.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in http plugin
// ---------------------------------------------------------------------------

/// Built-in plugin exposing one process-wide [`reqwest::Client`].
///
/// Config options: `timeoutMs` (request timeout), `userAgent`.
pub struct HttpPlugin {
    name: String,
    client: RwLock<Option<Arc<reqwest::Client>>>,
}

impl HttpPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Plugin for HttpPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self, config: &Value) -> Result<(), PluginError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.get("timeoutMs").and_then(Value::as_u64) {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ua) = config.get("userAgent").and_then(Value::as_str) {
            builder = builder.user_agent(ua.to_string());
        }
        let client = builder.build().map_err(|e| PluginError::Setup {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        *self.client.write() = Some(Arc::new(client));
        Ok(())
    }

    async fn teardown(&self) -> Result<(), PluginError> {
        *self.client.write() = None;
        Ok(())
    }

    fn client(&self) -> Result<PluginClient, PluginError> {
        match self.client.read().clone() {
            Some(client) => Ok(client),
            None => Err(PluginError::NotReady {
                name: self.name.clone(),
            }),
        }
    }
}

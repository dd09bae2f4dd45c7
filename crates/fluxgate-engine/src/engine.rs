//! Engine builder and assembly — the single entry point for embedding.
//!
//! ```rust,ignore
//! let engine = Engine::builder()
//!     .config(load_config(Path::new("fluxgate.json"))?)
//!     .action("users/fetch", FetchUsers)
//!     .plugin_factory("postgres", |key| Arc::new(PostgresPlugin::new(key)))
//!     .build()
//!     .await?;
//! ```
//!
//! `build()` drives the startup order the lifecycle contract requires:
//! every plugin is setup-complete before any flux definition is loaded, so
//! no endpoint can be registered against a half-initialised plugin set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::actions::{ActionHandler, ActionRegistry};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::executor::{Executor, ExecutorConfig};
use crate::loader::{FluxFileError, Loader};
use crate::plugins::{Plugin, PluginFactory, PluginRegistry};
use crate::types::FluxDef;

/// The assembled engine: plugins set up, actions registered, fluxes
/// loaded, executor ready. All internals are `Arc`-wrapped.
pub struct Engine {
    config: EngineConfig,
    actions: Arc<ActionRegistry>,
    plugins: Arc<PluginRegistry>,
    loader: Arc<Loader>,
    executor: Arc<Executor>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> Arc<Executor> {
        Arc::clone(&self.executor)
    }

    pub fn actions(&self) -> Arc<ActionRegistry> {
        Arc::clone(&self.actions)
    }

    /// All valid flux definitions from the last load.
    pub fn definitions(&self) -> Vec<Arc<FluxDef>> {
        self.loader.definitions()
    }

    /// Flux files that failed validation during the last load.
    pub fn flux_errors(&self) -> Vec<FluxFileError> {
        self.loader.flux_errors()
    }

    /// Rescan the flux and actions roots, atomically swapping the loaded
    /// tables. Returns the number of valid definitions.
    ///
    /// Routes already bound to an HTTP router are not re-registered:
    /// router route sets are fixed once built, so adding or removing an
    /// endpoint requires a restart. Changes to action libraries and to
    /// the *bodies* of existing fluxes take effect for callers that
    /// re-read [`definitions`](Self::definitions).
    pub fn reload(&self) -> usize {
        self.loader.reload(&self.actions)
    }

    /// Tear down every plugin, exactly once. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.plugins.teardown_all().await;
    }
}

/// Builder for [`Engine`]. All parts are optional except that a useful
/// engine wants a config pointing at real flux and action roots.
pub struct EngineBuilder {
    config: EngineConfig,
    actions: Vec<(String, Arc<dyn ActionHandler>)>,
    factories: HashMap<String, PluginFactory>,
    plugin_instances: Vec<Arc<dyn Plugin>>,
    executor_config: ExecutorConfig,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            actions: Vec::new(),
            factories: HashMap::new(),
            plugin_instances: Vec::new(),
            executor_config: ExecutorConfig::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a native action handler under `path`.
    pub fn action(mut self, path: &str, handler: impl ActionHandler + 'static) -> Self {
        self.actions.push((path.to_string(), Arc::new(handler)));
        self
    }

    /// Register a plugin constructor for a config `type` discriminator.
    pub fn plugin_factory(
        mut self,
        kind: &str,
        factory: impl Fn(&str) -> Arc<dyn Plugin> + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(kind.to_string(), Arc::new(factory));
        self
    }

    /// Register an already-constructed plugin outside the config.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugin_instances.push(Arc::new(plugin));
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Assemble the engine: instantiate and set up plugins, register and
    /// discover actions, load and validate fluxes.
    pub async fn build(self) -> Result<Engine, EngineError> {
        let plugins = Arc::new(PluginRegistry::from_config(
            &self.config.plugins,
            &self.factories,
            self.plugin_instances,
        )?);
        // Setup must complete before any endpoint exists.
        plugins.setup_all().await?;

        let actions = Arc::new(ActionRegistry::new());
        for (path, handler) in self.actions {
            actions.register(&path, handler);
        }

        let loader = Arc::new(Loader::new(
            &self.config.paths.flux,
            &self.config.paths.actions,
        ));
        let loaded = loader.load(&actions);
        tracing::info!(
            fluxes = loaded,
            actions = actions.len(),
            plugins = plugins.names().len(),
            "engine assembled"
        );
        for error in loader.flux_errors() {
            tracing::warn!(
                file = %error.file.display(),
                violations = error.errors.len(),
                "flux not registered"
            );
        }

        let executor = Arc::new(Executor::with_config(
            Arc::clone(&actions),
            Arc::clone(&plugins),
            self.executor_config,
        ));

        Ok(Engine {
            config: self.config,
            actions,
            plugins,
            loader,
            executor,
        })
    }
}

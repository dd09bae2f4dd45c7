//! Action handlers — the imperative work units a flux invokes by path.
//!
//! An action receives the whole request context: its resolved `args`, the
//! merged `input`, earlier `results`, scratch `state`, and plugin clients.
//! Whatever it returns is stored under the action node's `name`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::FlowContext;
use crate::errors::ActionError;

/// A callable unit of user-provided work.
///
/// Implementations should read their inputs from [`FlowContext::arg`] /
/// [`FlowContext::input`] and return the value to store under the action
/// node's `name`. Errors propagate to the nearest enclosing `try` node.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, ctx: &FlowContext) -> Result<Value, ActionError>;
}

/// Path-keyed table of action handlers.
///
/// Keys are `/`-separated paths relative to the configured actions root,
/// without file extensions (`users/fetch`). Registration happens through
/// the engine builder and through the native-library scan; later
/// registrations replace earlier ones under the same key.
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `path`, normalising `\` separators to `/`
    /// and trimming any leading separator.
    pub fn register(&self, path: &str, handler: Arc<dyn ActionHandler>) {
        let key = normalize_path(path);
        let replaced = self.actions.write().insert(key.clone(), handler);
        if replaced.is_some() {
            tracing::warn!(path = %key, "action handler replaced by later registration");
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.read().get(&normalize_path(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }

    /// Registered paths, sorted for stable listings.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.actions.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Drop every registered handler. Used by reload before a rescan.
    pub fn clear(&self) {
        self.actions.write().clear();
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Hello;

    #[async_trait]
    impl ActionHandler for Hello {
        async fn run(&self, _ctx: &FlowContext) -> Result<Value, ActionError> {
            Ok(json!({"message": "hi"}))
        }
    }

    #[tokio::test]
    async fn register_and_invoke() {
        let registry = ActionRegistry::new();
        registry.register("hello", Arc::new(Hello));

        let ctx = FlowContext::new("GET", "/hello", json!({}));
        let handler = registry.get("hello").unwrap();
        let result = handler.run(&ctx).await.unwrap();
        assert_eq!(result, json!({"message": "hi"}));
    }

    #[test]
    fn paths_normalised() {
        let registry = ActionRegistry::new();
        registry.register("users\\fetch", Arc::new(Hello));
        registry.register("/notify/send/", Arc::new(Hello));

        assert!(registry.get("users/fetch").is_some());
        assert!(registry.get("notify/send").is_some());
        assert_eq!(registry.paths(), vec!["notify/send", "users/fetch"]);
    }

    #[test]
    fn missing_action_is_none() {
        let registry = ActionRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn later_registration_wins() {
        let registry = ActionRegistry::new();
        registry.register("hello", Arc::new(Hello));
        registry.register("hello", Arc::new(Hello));
        assert_eq!(registry.len(), 1);
    }
}

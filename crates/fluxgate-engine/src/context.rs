//! The per-request context carried through a flow.
//!
//! Action authors interact with the engine exclusively through
//! [`FlowContext`]. The router binding constructs one per request — flow
//! and action code never create one directly. The context is shared
//! between the branches of a `parallel` node, so all mutable state lives
//! behind locks; branches writing the same result name are last-writer-wins
//! and a user error.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The opaque value a plugin exposes to actions, injected under
/// `plugins[name]`. Actions downcast to the concrete client type via
/// [`FlowContext::plugin`].
pub type PluginClient = Arc<dyn Any + Send + Sync>;

/// Identity of the HTTP request a context serves.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub id: Uuid,
    pub method: String,
    pub path: String,
}

/// The response a flow produced, waiting to be flushed by the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOut {
    pub status: u16,
    pub body: Value,
}

#[derive(Default)]
struct Vars {
    /// Action results keyed by node `name`.
    results: Map<String, Value>,
    /// Dynamic top-level bindings: action names, `forEach` variables,
    /// caught error variables.
    bindings: Map<String, Value>,
    /// Free-form scratch space for actions.
    state: Map<String, Value>,
    /// Argument bag of the action currently executing, if any.
    args: Option<Map<String, Value>>,
}

/// Per-request mutable state carried through a flow.
pub struct FlowContext {
    request: RequestMeta,
    /// Merged bag of body, query, and path parameters (later keys win).
    input: Value,
    plugins: RwLock<HashMap<String, PluginClient>>,
    vars: RwLock<Vars>,
    /// Write-once response slot.
    response: Mutex<Option<ResponseOut>>,
    terminated: AtomicBool,
    cancel: CancellationToken,
}

impl FlowContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>, input: Value) -> Self {
        Self {
            request: RequestMeta {
                id: Uuid::new_v4(),
                method: method.into(),
                path: path.into(),
            },
            input,
            plugins: RwLock::new(HashMap::new()),
            vars: RwLock::new(Vars::default()),
            response: Mutex::new(None),
            terminated: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the cancellation token the HTTP layer trips when the client
    /// goes away. In-flight actions may observe it; completed effects are
    /// not rolled back.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request(&self) -> &RequestMeta {
        &self.request
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Path lookup
    // -----------------------------------------------------------------------

    /// Resolve a dotted path against the context.
    ///
    /// The first segment selects a root — `input`, `results`, `state`,
    /// `args`, `request`, or a dynamic binding — and the remaining segments
    /// walk object fields and array indices. Any missing intermediate
    /// yields `None` (the context's notion of `undefined`, distinct from
    /// an explicit JSON null).
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let head = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        match head {
            "input" => walk(&self.input, &rest).cloned(),
            "results" => {
                let vars = self.vars.read();
                walk_map(&vars.results, &rest)
            }
            "state" => {
                let vars = self.vars.read();
                walk_map(&vars.state, &rest)
            }
            "args" => {
                let vars = self.vars.read();
                let args = vars.args.as_ref()?;
                walk_map(args, &rest)
            }
            "request" => {
                let meta = json!({
                    "id": self.request.id.to_string(),
                    "method": self.request.method,
                    "path": self.request.path,
                });
                walk(&meta, &rest).cloned()
            }
            name => {
                let vars = self.vars.read();
                let root = vars.bindings.get(name)?;
                walk(root, &rest).cloned()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bindings and results
    // -----------------------------------------------------------------------

    /// Bind a value at the context top level (`forEach` variables, caught
    /// errors).
    pub fn bind(&self, name: &str, value: Value) {
        self.vars.write().bindings.insert(name.to_string(), value);
    }

    /// Remove a top-level binding. Removing an absent name is a no-op.
    pub fn unbind(&self, name: &str) {
        self.vars.write().bindings.remove(name);
    }

    /// Store an action result under `name`, visible both as
    /// `results[name]` and as the top-level binding `name`.
    pub fn record_result(&self, name: &str, value: Value) {
        let mut vars = self.vars.write();
        vars.results.insert(name.to_string(), value.clone());
        vars.bindings.insert(name.to_string(), value);
    }

    /// Snapshot of all recorded action results.
    pub fn results(&self) -> Map<String, Value> {
        self.vars.read().results.clone()
    }

    // -----------------------------------------------------------------------
    // Action arguments
    // -----------------------------------------------------------------------

    /// Install the resolved argument bag for the action about to run.
    pub fn set_args(&self, args: Map<String, Value>) {
        self.vars.write().args = Some(args);
    }

    /// Clear the argument bag. Called on both normal and error exit from
    /// an action.
    pub fn clear_args(&self) {
        self.vars.write().args = None;
    }

    /// A single argument of the currently executing action.
    pub fn arg(&self, name: &str) -> Option<Value> {
        self.vars.read().args.as_ref()?.get(name).cloned()
    }

    /// The whole argument bag, if an action is currently executing.
    pub fn args(&self) -> Option<Value> {
        self.vars.read().args.clone().map(Value::Object)
    }

    // -----------------------------------------------------------------------
    // Scratch state
    // -----------------------------------------------------------------------

    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.vars.read().state.get(key).cloned()
    }

    pub fn state_set(&self, key: &str, value: Value) {
        self.vars.write().state.insert(key.to_string(), value);
    }

    // -----------------------------------------------------------------------
    // Plugins
    // -----------------------------------------------------------------------

    /// Replace the injected plugin clients. Called once by the executor
    /// before the flow walk starts.
    pub fn set_plugins(&self, clients: HashMap<String, PluginClient>) {
        *self.plugins.write() = clients;
    }

    pub fn plugin_client(&self, name: &str) -> Option<PluginClient> {
        self.plugins.read().get(name).cloned()
    }

    /// Fetch a plugin client downcast to its concrete type.
    pub fn plugin<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let client = self.plugin_client(name)?;
        client.downcast::<T>().ok()
    }

    // -----------------------------------------------------------------------
    // Response slot
    // -----------------------------------------------------------------------

    /// Write the response. Returns `false` if one was already written —
    /// the second write is a no-op, never an overwrite.
    pub fn write_response(&self, status: u16, body: Value) -> bool {
        let mut slot = self.response.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(ResponseOut { status, body });
        true
    }

    pub fn response_written(&self) -> bool {
        self.response.lock().is_some()
    }

    /// Take the response for flushing. The HTTP layer calls this exactly
    /// once after the executor returns.
    pub fn take_response(&self) -> Option<ResponseOut> {
        self.response.lock().take()
    }

    // -----------------------------------------------------------------------
    // Early termination
    // -----------------------------------------------------------------------

    /// Mark the flow as terminated by a `return` node. Sequence walks and
    /// parallel branches check this at every node boundary.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Walk object fields and array indices along `segments`.
fn walk<'v>(mut current: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    for seg in segments {
        current = match current {
            Value::Object(map) => map.get(*seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn walk_map(map: &Map<String, Value>, segments: &[&str]) -> Option<Value> {
    match segments.split_first() {
        None => Some(Value::Object(map.clone())),
        Some((first, rest)) => walk(map.get(*first)?, rest).cloned(),
    }
}

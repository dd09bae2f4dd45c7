//! Native action libraries discovered under the actions root.
//!
//! Actions are normally registered in-process through the engine builder;
//! this module adds filesystem discovery for actions compiled to shared
//! libraries (`.so`/`.dll`/`.dylib`), registered under their
//! extension-stripped path relative to the actions root.
//!
//! # C ABI contract
//!
//! Every action library must export:
//!
//! - `action_run(ctx_json) -> *const c_char` — receives a JSON snapshot of
//!   the request context (`request`, `input`, `args`, `results`, `state`)
//!   and returns the result as JSON. Returning an object with a top-level
//!   `"$error"` string fails the action with that message.
//! - `action_free(ptr)` — frees a string previously returned by
//!   `action_run`.

use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::actions::{ActionHandler, ActionRegistry};
use crate::context::FlowContext;
use crate::errors::ActionError;

type ActionRunFn = unsafe extern "C" fn(*const c_char) -> *const c_char;
type ActionFreeFn = unsafe extern "C" fn(*const c_char);

const LIBRARY_EXTENSIONS: [&str; 3] = ["so", "dylib", "dll"];

/// An action handler backed by a loaded shared library.
pub struct DylibAction {
    path: PathBuf,
    library: Arc<libloading::Library>,
}

impl DylibAction {
    /// Load the library at `path` and verify the required symbols.
    pub fn load(path: &Path) -> Result<Self, ActionError> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            ActionError::new(format!("failed to load {}: {e}", path.display()))
        })?;
        // Fail now, not at first request, if the contract is unmet.
        unsafe {
            library
                .get::<ActionRunFn>(b"action_run")
                .map_err(|_| missing_symbol(path, "action_run"))?;
            library
                .get::<ActionFreeFn>(b"action_free")
                .map_err(|_| missing_symbol(path, "action_free"))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
        })
    }

    fn invoke(&self, ctx_json: &str) -> Result<Value, ActionError> {
        let input = CString::new(ctx_json)
            .map_err(|_| ActionError::new("context snapshot contained a NUL byte"))?;

        let run: libloading::Symbol<'_, ActionRunFn> =
            unsafe { self.library.get(b"action_run") }
                .map_err(|_| missing_symbol(&self.path, "action_run"))?;
        let free: libloading::Symbol<'_, ActionFreeFn> =
            unsafe { self.library.get(b"action_free") }
                .map_err(|_| missing_symbol(&self.path, "action_free"))?;

        let ptr = input.as_ptr();
        let raw = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe { run(ptr) }))
            .map_err(|_| {
                ActionError::new(format!("action library {} panicked", self.path.display()))
            })?;

        if raw.is_null() {
            return Err(ActionError::new(format!(
                "action library {} returned null",
                self.path.display()
            )));
        }

        let text = unsafe { CStr::from_ptr(raw) }.to_str().map(str::to_owned);
        unsafe { free(raw) };

        let text = text.map_err(|_| ActionError::new("action returned invalid UTF-8"))?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ActionError::new(format!("action returned invalid JSON: {e}")))?;

        if let Some(message) = value.get("$error").and_then(Value::as_str) {
            return Err(ActionError::new(message.to_string()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ActionHandler for DylibAction {
    async fn run(&self, ctx: &FlowContext) -> Result<Value, ActionError> {
        let snapshot = json!({
            "request": {
                "method": ctx.request().method,
                "path": ctx.request().path,
            },
            "input": ctx.input(),
            "args": ctx.args(),
            "results": Value::Object(ctx.results()),
            "state": ctx.lookup("state"),
        });
        self.invoke(&snapshot.to_string())
    }
}

fn missing_symbol(path: &Path, symbol: &str) -> ActionError {
    ActionError::new(format!(
        "{} does not export '{symbol}'",
        path.display()
    ))
}

/// Scan `root` for action libraries and register each under its
/// root-relative, extension-stripped path.
///
/// A missing root is a warning, never an abort. Files that are not shared
/// libraries are skipped; libraries that fail to load or do not honour the
/// symbol contract are skipped with a warning so one bad file cannot take
/// down the whole load.
pub fn load_action_libraries(root: &Path, registry: &ActionRegistry) -> usize {
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "actions root missing, no action libraries loaded");
        return 0;
    }

    let mut loaded = 0;
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read actions root entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_library = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| LIBRARY_EXTENSIONS.contains(&ext));
        if !is_library {
            tracing::debug!(file = %path.display(), "skipping non-library file in actions root");
            continue;
        }

        let key = match action_key(root, path) {
            Some(k) => k,
            None => continue,
        };
        match DylibAction::load(path) {
            Ok(action) => {
                tracing::info!(path = %key, file = %path.display(), "loaded action library");
                registry.register(&key, Arc::new(action));
                loaded += 1;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping action library");
            }
        }
    }
    loaded
}

/// The registry key for a library file: root-relative path, `/` separators,
/// extension stripped.
fn action_key(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let stem = relative.with_extension("");
    let key = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

//! Startup and reload discovery of flux definitions and action handlers.
//!
//! Two configured roots feed two tables: the flux root is walked for
//! `.json` files (any nesting) which are parsed and validated, and the
//! actions root is walked for native action libraries. A single bad file
//! never aborts a load, and a missing root yields an empty table with a
//! warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::actions::ActionRegistry;
use crate::dylib::load_action_libraries;
use crate::errors::Violation;
use crate::types::FluxDef;
use crate::validate::validate_flux;

/// A flux file that failed to parse or validate, kept for the `validate`
/// command and startup diagnostics.
#[derive(Debug, Clone)]
pub struct FluxFileError {
    pub file: PathBuf,
    pub errors: Vec<Violation>,
    pub seen_at: DateTime<Utc>,
}

/// Discovers and holds the loaded flux definitions.
///
/// `reload` rebuilds both tables off to the side and swaps them in
/// atomically; readers never observe a half-loaded state.
pub struct Loader {
    flux_root: PathBuf,
    actions_root: PathBuf,
    definitions: RwLock<Vec<Arc<FluxDef>>>,
    errors: RwLock<Vec<FluxFileError>>,
}

impl Loader {
    pub fn new(flux_root: impl Into<PathBuf>, actions_root: impl Into<PathBuf>) -> Self {
        Self {
            flux_root: flux_root.into(),
            actions_root: actions_root.into(),
            definitions: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
        }
    }

    /// Load both tables: action libraries into `registry`, flux files into
    /// the definition table. Returns the number of valid definitions.
    pub fn load(&self, registry: &ActionRegistry) -> usize {
        load_action_libraries(&self.actions_root, registry);
        self.load_flux_definitions()
    }

    /// Walk the flux root, validate every `.json` file, and swap in the
    /// surviving definitions. Invalid files land in [`flux_errors`](Self::flux_errors).
    pub fn load_flux_definitions(&self) -> usize {
        let mut definitions: Vec<Arc<FluxDef>> = Vec::new();
        let mut errors: Vec<FluxFileError> = Vec::new();

        for file in self.flux_files() {
            match load_flux_file(&file) {
                Ok(def) => {
                    let duplicate = definitions
                        .iter()
                        .position(|d| d.method == def.method && d.endpoint == def.endpoint);
                    if let Some(i) = duplicate {
                        tracing::warn!(
                            method = %def.method,
                            endpoint = %def.endpoint,
                            file = %file.display(),
                            "duplicate route, later file wins"
                        );
                        definitions.remove(i);
                    }
                    definitions.push(Arc::new(def));
                }
                Err(violations) => {
                    tracing::warn!(
                        file = %file.display(),
                        count = violations.len(),
                        "flux failed validation, not registered"
                    );
                    errors.push(FluxFileError {
                        file,
                        errors: violations,
                        seen_at: Utc::now(),
                    });
                }
            }
        }

        let count = definitions.len();
        *self.definitions.write() = definitions;
        *self.errors.write() = errors;
        count
    }

    /// All valid definitions from the last load.
    pub fn definitions(&self) -> Vec<Arc<FluxDef>> {
        self.definitions.read().clone()
    }

    /// Files that failed parsing or validation during the last load.
    pub fn flux_errors(&self) -> Vec<FluxFileError> {
        self.errors.read().clone()
    }

    /// Rescan both roots. Native action handlers registered through the
    /// builder are preserved; library-backed handlers are reloaded.
    ///
    /// Route registration is a separate concern: most HTTP routers are
    /// immutable once built, so a changed route *set* requires a restart.
    pub fn reload(&self, registry: &ActionRegistry) -> usize {
        load_action_libraries(&self.actions_root, registry);
        self.load_flux_definitions()
    }

    /// Flux files under the root, sorted so load order (and duplicate
    /// resolution) is deterministic.
    fn flux_files(&self) -> Vec<PathBuf> {
        if !self.flux_root.is_dir() {
            tracing::warn!(
                root = %self.flux_root.display(),
                "flux root missing, no endpoints loaded"
            );
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.flux_root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() => Some(e.into_path()),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read flux root entry");
                    None
                }
            })
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        files
    }
}

fn load_flux_file(file: &Path) -> Result<FluxDef, Vec<Violation>> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| vec![Violation::new("$", format!("failed to read file: {e}"))])?;
    let doc: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| vec![Violation::new("$", format!("invalid JSON: {e}"))])?;
    validate_flux(&doc)?;
    serde_json::from_value(doc)
        .map_err(|e| vec![Violation::new("$", format!("failed to deserialise: {e}"))])
}

//! Fluxgate server binary.
//!
//! Usage:
//!
//! ```text
//! fluxgate [config.json]            # serve
//! fluxgate validate [config.json]   # check flux files; exit 0/1
//! ```
//!
//! The config path may also come from `FLUXGATE_CONFIG`; it defaults to
//! `fluxgate.json` in the working directory.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fluxgate_engine::{load_config, Engine, EngineConfig};
use fluxgate_server::Server;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let (validate_mode, config_arg) = match args.next() {
        Some(arg) if arg == "validate" => (true, args.next()),
        other => (false, other),
    };

    let config_path = config_arg
        .or_else(|| std::env::var("FLUXGATE_CONFIG").ok())
        .unwrap_or_else(|| "fluxgate.json".to_string());

    let config = match load_config(&PathBuf::from(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {config_path}: {e}");
            process::exit(1);
        }
    };

    init_tracing(&config);

    let engine = match Engine::builder().config(config).build().await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "engine startup failed");
            process::exit(1);
        }
    };

    if validate_mode {
        process::exit(run_validate(&engine));
    }

    if let Err(e) = Server::new(engine).serve().await {
        tracing::error!(error = %e, "server failed");
        process::exit(1);
    }
}

/// Print per-file validation results; exit code 0 when every flux
/// validated, 1 otherwise.
fn run_validate(engine: &Engine) -> i32 {
    let errors = engine.flux_errors();
    let valid = engine.definitions().len();
    if errors.is_empty() {
        println!("{valid} flux definition(s) valid");
        return 0;
    }

    for file in &errors {
        println!("{}:", file.file.display());
        for violation in &file.errors {
            println!("  {violation}");
        }
    }
    println!("{valid} valid, {} invalid", errors.len());
    1
}

/// `RUST_LOG` wins when set; otherwise the config's `logging.level`.
fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

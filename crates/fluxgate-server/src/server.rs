//! Server lifecycle: engine → router → listen → graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fluxgate_engine::{CorsConfig, CorsOrigin, Engine};

use crate::router::build_router;

/// Errors from running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Binds the engine's loaded fluxes to an axum server.
pub struct Server {
    engine: Arc<Engine>,
}

impl Server {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// The router for every loaded definition, with trace and CORS layers
    /// applied per config.
    pub fn router(&self) -> Router {
        let mut router = build_router(&self.engine.definitions(), self.engine.executor())
            .layer(TraceLayer::new_for_http());
        if let Some(cors) = &self.engine.config().server.cors {
            router = router.layer(cors_layer(cors));
        }
        router
    }

    /// Serve until ctrl-c, then tear plugins down.
    pub async fn serve(self) -> Result<(), ServerError> {
        let config = &self.engine.config().server;
        let host = config.host.as_deref().unwrap_or("0.0.0.0");
        let addr = format!("{host}:{}", config.port);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            routes = self.engine.definitions().len(),
            "fluxgate listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.engine.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

/// Translate the config's CORS section into a `CorsLayer`.
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    let wildcard = matches!(config.origin, Some(CorsOrigin::Any(true)));
    match &config.origin {
        Some(CorsOrigin::Any(true)) => layer = layer.allow_origin(Any),
        Some(CorsOrigin::Any(false)) | None => {}
        Some(CorsOrigin::One(origin)) => match origin.parse::<HeaderValue>() {
            Ok(value) => layer = layer.allow_origin(value),
            Err(_) => tracing::warn!(origin = %origin, "invalid CORS origin, ignored"),
        },
        Some(CorsOrigin::Many(origins)) => {
            let values: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(origin = %o, "invalid CORS origin, ignored");
                        None
                    }
                })
                .collect();
            layer = layer.allow_origin(AllowOrigin::list(values));
        }
    }

    if config.credentials == Some(true) {
        // The CORS protocol forbids credentials with a wildcard origin.
        if wildcard {
            tracing::warn!("CORS credentials ignored: incompatible with wildcard origin");
        } else {
            layer = layer.allow_credentials(true);
        }
    }

    if let Some(methods) = &config.methods {
        let parsed: Vec<Method> = methods.iter().filter_map(|m| m.parse().ok()).collect();
        layer = layer.allow_methods(parsed);
    }
    if let Some(headers) = &config.allowed_headers {
        let parsed: Vec<HeaderName> = headers.iter().filter_map(|h| h.parse().ok()).collect();
        layer = layer.allow_headers(parsed);
    }
    if let Some(headers) = &config.exposed_headers {
        let parsed: Vec<HeaderName> = headers.iter().filter_map(|h| h.parse().ok()).collect();
        layer = layer.expose_headers(parsed);
    }
    if let Some(secs) = config.max_age {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cors(value: serde_json::Value) -> CorsConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn cors_layer_accepts_all_config_shapes() {
        // Building the layer must not panic for any accepted config form.
        cors_layer(&cors(json!({"origin": true})));
        cors_layer(&cors(json!({"origin": "https://app.example"})));
        cors_layer(&cors(json!({
            "origin": ["https://a.example", "https://b.example"],
            "credentials": true,
            "methods": ["GET", "POST"],
            "allowedHeaders": ["content-type"],
            "exposedHeaders": ["x-request-id"],
            "maxAge": 300
        })));
    }

    #[test]
    fn credentials_with_wildcard_origin_dropped() {
        // Must not panic: tower-http rejects this combination at runtime,
        // so the translation drops credentials instead.
        cors_layer(&cors(json!({"origin": true, "credentials": true})));
    }
}

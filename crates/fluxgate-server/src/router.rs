//! Route construction from loaded flux definitions.
//!
//! One handler per `(method, endpoint)`; endpoints sharing a path
//! accumulate onto a single `MethodRouter`. Flux endpoint patterns use
//! colon path parameters (`/users/:id`), the same syntax axum matches, so
//! patterns pass through unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Json, Path, Query};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use fluxgate_engine::{Executor, FlowContext, FluxDef, HttpMethod, ResponseOut};

/// Build an axum router with one route per definition.
pub fn build_router(definitions: &[Arc<FluxDef>], executor: Arc<Executor>) -> Router {
    let mut method_routers: HashMap<String, MethodRouter> = HashMap::new();

    for def in definitions {
        tracing::info!(method = %def.method, endpoint = %def.endpoint, "route registered");
        let entry = method_routers
            .remove(&def.endpoint)
            .unwrap_or_default();

        let endpoint = def.endpoint.clone();
        let method = def.method;
        let def = Arc::clone(def);
        let executor = Arc::clone(&executor);
        let handler = move |uri: Uri,
                            Path(params): Path<HashMap<String, String>>,
                            Query(query): Query<HashMap<String, String>>,
                            body: Option<Json<Value>>| {
            let def = Arc::clone(&def);
            let executor = Arc::clone(&executor);
            async move {
                let input = merge_input(body.map(|Json(v)| v), &query, &params);
                handle_flux(&def, &executor, uri.path(), input).await
            }
        };

        method_routers.insert(endpoint, entry.on(method_filter(method), handler));
    }

    let mut router = Router::new();
    for (path, method_router) in method_routers {
        router = router.route(&path, method_router);
    }
    router
}

/// Merge `{…body, …query, …params}` into the context's `input` — later
/// keys win on collision.
fn merge_input(
    body: Option<Value>,
    query: &HashMap<String, String>,
    params: &HashMap<String, String>,
) -> Value {
    let mut input = Map::new();
    if let Some(Value::Object(map)) = body {
        input.extend(map);
    }
    for (k, v) in query {
        input.insert(k.clone(), Value::String(v.clone()));
    }
    for (k, v) in params {
        input.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(input)
}

async fn handle_flux(
    def: &Arc<FluxDef>,
    executor: &Arc<Executor>,
    path: &str,
    input: Value,
) -> Response {
    let cancel = CancellationToken::new();
    let ctx = Arc::new(
        FlowContext::new(def.method.as_str(), path, input).with_cancellation(cancel.clone()),
    );
    // If the connection drops, axum drops this future; the guard trips the
    // token so in-flight actions can observe the cancellation.
    let mut guard = CancelOnDrop {
        token: cancel,
        armed: true,
    };

    executor.execute_flux(def, &ctx).await;
    guard.armed = false;

    let response = ctx.take_response().unwrap_or_else(|| {
        // The executor guarantees a response; this is a belt for the HTTP
        // layer only.
        tracing::error!(endpoint = %def.endpoint, "flow finished without a response");
        ResponseOut {
            status: 500,
            body: json!({"error": "Internal server error"}),
        }
    });

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

struct CancelOnDrop {
    token: CancellationToken,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Delete => MethodFilter::DELETE,
        HttpMethod::Patch => MethodFilter::PATCH,
        HttpMethod::Options => MethodFilter::OPTIONS,
        HttpMethod::Head => MethodFilter::HEAD,
    }
}

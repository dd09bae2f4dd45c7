//! The flow interpreter.
//!
//! Walks a flux's node tree over the per-request context: dispatches on
//! the node tag, manages bindings and action arguments, propagates
//! early-return, fans out parallel branches over the shared context, and
//! guarantees exactly one response per request — explicit via a `return`
//! node, the implicit `200 {"success":true}` tail, or the opaque `500`
//! written when a failure escapes every `try`.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::{json, Map, Value};

use crate::actions::ActionRegistry;
use crate::condition::evaluate_condition;
use crate::context::FlowContext;
use crate::errors::FlowError;
use crate::interpolate::{resolve, resolve_str};
use crate::plugins::PluginRegistry;
use crate::types::{FlowNode, FluxDef};

/// Executor tuning.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Warn when two parallel branches bind the same action name. Writes
    /// to a shared name are last-writer-wins and a user error; this check
    /// surfaces them during development.
    pub debug_parallel_checks: bool,
}

/// Interprets flux flows. One instance serves every request.
pub struct Executor {
    actions: Arc<ActionRegistry>,
    plugins: Arc<PluginRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(actions: Arc<ActionRegistry>, plugins: Arc<PluginRegistry>) -> Self {
        Self::with_config(actions, plugins, ExecutorConfig::default())
    }

    pub fn with_config(
        actions: Arc<ActionRegistry>,
        plugins: Arc<PluginRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            actions,
            plugins,
            config,
        }
    }

    /// Run a flux over a request context.
    ///
    /// Always leaves exactly one response in the context's slot; the HTTP
    /// layer only has to flush it. The definition is never mutated.
    pub async fn execute_flux(&self, def: &FluxDef, ctx: &Arc<FlowContext>) {
        if let Err(e) = self.plugins.inject(ctx) {
            tracing::error!(
                request_id = %ctx.request().id,
                error = %e,
                "plugin injection failed"
            );
            ctx.write_response(500, json!({"error": "Internal server error"}));
            return;
        }

        match self.run_sequence(&def.flow, ctx).await {
            Ok(_) => {
                if !ctx.response_written() {
                    ctx.write_response(200, json!({"success": true}));
                }
            }
            Err(e) => {
                // Details are logged, never leaked to the client.
                tracing::error!(
                    request_id = %ctx.request().id,
                    endpoint = %def.endpoint,
                    error = %e,
                    "unhandled failure in flow"
                );
                if !ctx.response_written() {
                    ctx.write_response(500, json!({"error": "Internal server error"}));
                }
            }
        }
    }

    /// Walk `nodes` in order. Returns `true` when the walk was cut short
    /// by a `return` node (the caller must not run its remaining
    /// siblings). Re-checks at every node boundary, so parallel branches
    /// stop cooperatively and a response written by any path halts the
    /// rest of the walk.
    fn run_sequence<'a>(
        &'a self,
        nodes: &'a [FlowNode],
        ctx: &'a Arc<FlowContext>,
    ) -> BoxFuture<'a, Result<bool, FlowError>> {
        async move {
            for node in nodes {
                if ctx.terminated() || ctx.response_written() {
                    return Ok(true);
                }
                if self.execute_node(node, ctx).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .boxed()
    }

    async fn execute_node(
        &self,
        node: &FlowNode,
        ctx: &Arc<FlowContext>,
    ) -> Result<bool, FlowError> {
        match node {
            FlowNode::Action { name, path, args } => {
                let handler = self
                    .actions
                    .get(path)
                    .ok_or_else(|| FlowError::ActionNotFound { path: path.clone() })?;

                match args {
                    Some(args) => {
                        let mut resolved = Map::with_capacity(args.len());
                        for (key, value) in args {
                            resolved.insert(key.clone(), resolve(value, ctx));
                        }
                        ctx.set_args(resolved);
                    }
                    None => ctx.clear_args(),
                }

                let started = Instant::now();
                let outcome = handler.run(ctx).await;
                // Cleared on both the normal and the error path.
                ctx.clear_args();

                let value = outcome.map_err(|source| FlowError::Action {
                    name: name.clone(),
                    source,
                })?;
                tracing::debug!(
                    action = %name,
                    path = %path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "action completed"
                );
                ctx.record_result(name, value);
                Ok(false)
            }

            FlowNode::Condition {
                when,
                then,
                otherwise,
            } => {
                if evaluate_condition(when, ctx) {
                    self.run_sequence(then, ctx).await
                } else if let Some(nodes) = otherwise {
                    self.run_sequence(nodes, ctx).await
                } else {
                    Ok(false)
                }
            }

            FlowNode::ForEach { items, bind, body } => {
                let resolved = resolve_str(items, ctx);
                let Value::Array(elements) = resolved else {
                    tracing::warn!(
                        expression = %items,
                        "forEach items did not resolve to an array, skipping"
                    );
                    return Ok(false);
                };

                let mut outcome = Ok(false);
                for element in elements {
                    if ctx.terminated() {
                        outcome = Ok(true);
                        break;
                    }
                    ctx.bind(bind, element);
                    match self.run_sequence(body, ctx).await {
                        Ok(false) => {}
                        other => {
                            outcome = other;
                            break;
                        }
                    }
                }
                // Unbound on every exit: normal, early, or thrown.
                ctx.unbind(bind);
                outcome
            }

            FlowNode::Parallel { branches } => {
                if branches.is_empty() {
                    return Ok(false);
                }
                if self.config.debug_parallel_checks {
                    warn_on_shared_result_names(branches);
                }

                let results =
                    join_all(branches.iter().map(|branch| self.run_sequence(branch, ctx)))
                        .await;

                let mut early = false;
                for result in results {
                    match result {
                        Ok(e) => early |= e,
                        // First failure observed wins; completed branches
                        // keep their effects.
                        Err(err) => return Err(err),
                    }
                }
                Ok(early)
            }

            FlowNode::Try {
                attempt,
                catch,
                error_var,
            } => {
                match self.run_sequence(attempt, ctx).await {
                    // Early-return from try skips catch entirely.
                    Ok(early) => Ok(early),
                    Err(err) => {
                        tracing::debug!(error = %err, "try block failed, running catch");
                        if let Some(var) = error_var {
                            ctx.bind(var, err.to_value());
                        }
                        // A failure inside catch escapes to the enclosing
                        // scope unchanged.
                        self.run_sequence(catch, ctx).await
                    }
                }
            }

            FlowNode::Return { status, body } => {
                let resolved = resolve(body, ctx);
                if !ctx.write_response(status.unwrap_or(200), resolved) {
                    tracing::debug!("response already written, return is a no-op");
                }
                ctx.terminate();
                Ok(true)
            }
        }
    }
}

/// Static disjointness check for parallel branches: action names bound in
/// more than one branch are flagged.
fn warn_on_shared_result_names(branches: &[Vec<FlowNode>]) {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for (i, branch) in branches.iter().enumerate() {
        let mut names = Vec::new();
        collect_action_names(branch, &mut names);
        for name in names {
            if let Some(prev) = seen.insert(name.clone(), i) {
                if prev != i {
                    tracing::warn!(
                        name = %name,
                        "parallel branches share a result name; writes are last-writer-wins"
                    );
                }
            }
        }
    }
}

fn collect_action_names(nodes: &[FlowNode], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            FlowNode::Action { name, .. } => out.push(name.clone()),
            FlowNode::Condition {
                then, otherwise, ..
            } => {
                collect_action_names(then, out);
                if let Some(nodes) = otherwise {
                    collect_action_names(nodes, out);
                }
            }
            FlowNode::ForEach { body, .. } => collect_action_names(body, out),
            FlowNode::Parallel { branches } => {
                for branch in branches {
                    collect_action_names(branch, out);
                }
            }
            FlowNode::Try { attempt, catch, .. } => {
                collect_action_names(attempt, out);
                collect_action_names(catch, out);
            }
            FlowNode::Return { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionHandler;
    use crate::errors::ActionError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Returns a fixed value.
    struct Fixed(Value);

    #[async_trait]
    impl ActionHandler for Fixed {
        async fn run(&self, _ctx: &FlowContext) -> Result<Value, ActionError> {
            Ok(self.0.clone())
        }
    }

    /// Records every invocation's `x` argument (or bound `x` variable).
    struct Recorder(Arc<Mutex<Vec<Value>>>);

    #[async_trait]
    impl ActionHandler for Recorder {
        async fn run(&self, ctx: &FlowContext) -> Result<Value, ActionError> {
            let seen = ctx
                .arg("x")
                .or_else(|| ctx.lookup("x"))
                .unwrap_or(Value::Null);
            self.0.lock().push(seen.clone());
            Ok(seen)
        }
    }

    /// Always fails.
    struct Boom;

    #[async_trait]
    impl ActionHandler for Boom {
        async fn run(&self, _ctx: &FlowContext) -> Result<Value, ActionError> {
            Err(ActionError::new("boom"))
        }
    }

    /// Asserts args are visible while the action runs.
    struct ArgsProbe;

    #[async_trait]
    impl ActionHandler for ArgsProbe {
        async fn run(&self, ctx: &FlowContext) -> Result<Value, ActionError> {
            assert!(ctx.args().is_some(), "args must be set during invocation");
            Ok(ctx.arg("id").unwrap_or(Value::Null))
        }
    }

    fn executor(actions: ActionRegistry) -> Executor {
        Executor::new(Arc::new(actions), Arc::new(PluginRegistry::empty()))
    }

    fn flux(flow: Value) -> FluxDef {
        serde_json::from_value(json!({
            "endpoint": "/t", "method": "POST", "flow": flow
        }))
        .unwrap()
    }

    fn ctx(input: Value) -> Arc<FlowContext> {
        Arc::new(FlowContext::new("POST", "/t", input))
    }

    // -----------------------------------------------------------------------
    // Action semantics
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn action_result_double_bound_and_args_cleared() {
        let actions = ActionRegistry::new();
        actions.register("probe", Arc::new(ArgsProbe));
        let def = flux(json!([
            {"type": "action", "name": "r", "path": "probe", "args": {"id": "${input.id}"}}
        ]));

        let ctx = ctx(json!({"id": 41}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(ctx.lookup("results.r"), Some(json!(41)));
        assert_eq!(ctx.lookup("r"), Some(json!(41)));
        assert_eq!(ctx.lookup("results.r"), ctx.lookup("r"));
        assert!(ctx.args().is_none(), "args must be cleared after the action");
    }

    #[tokio::test]
    async fn args_cleared_on_error_path() {
        let actions = ActionRegistry::new();
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "action", "name": "r", "path": "boom", "args": {"id": 1}}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert!(ctx.args().is_none());
        assert_eq!(ctx.take_response().unwrap().status, 500);
    }

    #[tokio::test]
    async fn missing_action_fails_flow() {
        let def = flux(json!([{"type": "action", "name": "r", "path": "ghost"}]));
        let ctx = ctx(json!({}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;

        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, json!({"error": "Internal server error"}));
    }

    // -----------------------------------------------------------------------
    // Responses
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn implicit_success_tail() {
        let def = flux(json!([]));
        let ctx = ctx(json!({}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;

        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({"success": true}));
    }

    #[tokio::test]
    async fn return_resolves_body_and_status() {
        let actions = ActionRegistry::new();
        actions.register("hello", Arc::new(Fixed(json!({"message": "hi"}))));
        let def = flux(json!([
            {"type": "action", "name": "r", "path": "hello"},
            {"type": "return", "status": 201, "body": "${r}"}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;

        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, json!({"message": "hi"}));
    }

    #[tokio::test]
    async fn return_stops_subsequent_siblings() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let actions = ActionRegistry::new();
        actions.register("rec", Arc::new(Recorder(order.clone())));
        let def = flux(json!([
            {"type": "return", "body": "done"},
            {"type": "action", "name": "after", "path": "rec"}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert!(order.lock().is_empty(), "nodes after return must not run");
        assert_eq!(ctx.take_response().unwrap().body, json!("done"));
    }

    #[tokio::test]
    async fn return_inside_parallel_short_circuits_outer_flow() {
        let def = flux(json!([
            {"type": "parallel", "branches": [
                [{"type": "return", "body": "first"}]
            ]},
            {"type": "return", "body": "second"}
        ]));
        let ctx = ctx(json!({}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("first"));
    }

    #[tokio::test]
    async fn walk_stops_when_response_already_written() {
        let def = flux(json!([{"type": "return", "body": "from flow"}]));
        let ctx = ctx(json!({}));
        // An action (or an earlier path) already answered the request.
        ctx.write_response(202, json!("already sent"));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;

        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.status, 202);
        assert_eq!(resp.body, json!("already sent"));
    }

    // -----------------------------------------------------------------------
    // Condition
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn condition_branches() {
        let def = flux(json!([
            {"type": "condition", "if": "${input.flag}",
             "then": [{"type": "return", "body": "yes"}],
             "else": [{"type": "return", "body": "no"}]}
        ]));
        let exec = executor(ActionRegistry::new());

        let yes = ctx(json!({"flag": true}));
        exec.execute_flux(&def, &yes).await;
        assert_eq!(yes.take_response().unwrap().body, json!("yes"));

        let no = ctx(json!({"flag": false}));
        exec.execute_flux(&def, &no).await;
        assert_eq!(no.take_response().unwrap().body, json!("no"));
    }

    #[tokio::test]
    async fn condition_without_else_continues() {
        let def = flux(json!([
            {"type": "condition", "if": "${input.flag}",
             "then": [{"type": "return", "body": "yes"}]},
            {"type": "return", "body": "fell through"}
        ]));
        let ctx = ctx(json!({"flag": false}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("fell through"));
    }

    // -----------------------------------------------------------------------
    // ForEach
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn for_each_sequential_in_order_and_unbound_after() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let actions = ActionRegistry::new();
        actions.register("rec", Arc::new(Recorder(order.clone())));
        let def = flux(json!([
            {"type": "forEach", "items": "${input.xs}", "as": "x",
             "do": [{"type": "action", "name": "seen", "path": "rec"}]}
        ]));

        let ctx = ctx(json!({"xs": [1, 2, 3]}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(*order.lock(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(ctx.lookup("x"), None, "loop variable must be unbound");
        assert_eq!(ctx.take_response().unwrap().body, json!({"success": true}));
    }

    #[tokio::test]
    async fn for_each_non_array_is_noop() {
        let def = flux(json!([
            {"type": "forEach", "items": "${input.xs}", "as": "x",
             "do": [{"type": "return", "body": "looped"}]},
            {"type": "return", "body": "skipped"}
        ]));
        let ctx = ctx(json!({"xs": "not-an-array"}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("skipped"));
    }

    #[tokio::test]
    async fn for_each_early_return_unbinds() {
        let def = flux(json!([
            {"type": "forEach", "items": "${input.xs}", "as": "x",
             "do": [
                {"type": "condition", "if": "${x} === 2",
                 "then": [{"type": "return", "body": "${x}"}]}
             ]}
        ]));
        let ctx = ctx(json!({"xs": [1, 2, 3]}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;

        assert_eq!(ctx.take_response().unwrap().body, json!(2));
        assert_eq!(ctx.lookup("x"), None);
    }

    #[tokio::test]
    async fn for_each_error_unbinds_and_propagates() {
        let actions = ActionRegistry::new();
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "forEach", "items": "${input.xs}", "as": "x",
             "do": [{"type": "action", "name": "r", "path": "boom"}]}
        ]));
        let ctx = ctx(json!({"xs": [1, 2]}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(ctx.take_response().unwrap().status, 500);
        assert_eq!(ctx.lookup("x"), None);
    }

    // -----------------------------------------------------------------------
    // Parallel
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn parallel_branches_fill_disjoint_results() {
        let actions = ActionRegistry::new();
        actions.register("one", Arc::new(Fixed(json!("r1"))));
        actions.register("two", Arc::new(Fixed(json!("r2"))));
        let def = flux(json!([
            {"type": "parallel", "branches": [
                [{"type": "action", "name": "b1", "path": "one"}],
                [{"type": "action", "name": "b2", "path": "two"}]
            ]}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(
            Value::Object(ctx.results()),
            json!({"b1": "r1", "b2": "r2"})
        );
    }

    #[tokio::test]
    async fn parallel_empty_branches_succeed() {
        let def = flux(json!([
            {"type": "parallel", "branches": []},
            {"type": "return", "body": "after"}
        ]));
        let ctx = ctx(json!({}));
        executor(ActionRegistry::new()).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("after"));
    }

    #[tokio::test]
    async fn parallel_failure_propagates() {
        let actions = ActionRegistry::new();
        actions.register("ok", Arc::new(Fixed(json!(1))));
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "parallel", "branches": [
                [{"type": "action", "name": "a", "path": "ok"}],
                [{"type": "action", "name": "b", "path": "boom"}]
            ]}
        ]));
        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().status, 500);
    }

    #[tokio::test]
    async fn parallel_early_return_stops_sibling_branches() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let actions = ActionRegistry::new();
        actions.register("rec", Arc::new(Recorder(order.clone())));
        let def = flux(json!([
            {"type": "parallel", "branches": [
                [{"type": "return", "body": "fast"}],
                [{"type": "action", "name": "slow", "path": "rec"}]
            ]}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(ctx.take_response().unwrap().body, json!("fast"));
        assert!(
            order.lock().is_empty(),
            "sibling branch must stop at its next node boundary"
        );
    }

    // -----------------------------------------------------------------------
    // Try / catch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn try_catch_binds_error_var() {
        let actions = ActionRegistry::new();
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "try",
             "try": [{"type": "action", "name": "r", "path": "boom"}],
             "catch": [{"type": "return", "body": {
                 "caught": "caught", "message": "${e.message}"
             }}],
             "errorVar": "e"}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;

        assert_eq!(ctx.lookup("e.message"), Some(json!("boom")));
        let resp = ctx.take_response().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({"caught": "caught", "message": "boom"}));
    }

    #[tokio::test]
    async fn early_return_from_try_skips_catch() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let actions = ActionRegistry::new();
        actions.register("rec", Arc::new(Recorder(order.clone())));
        let def = flux(json!([
            {"type": "try",
             "try": [{"type": "return", "body": "returned"}],
             "catch": [{"type": "action", "name": "c", "path": "rec"}]}
        ]));

        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("returned"));
        assert!(order.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_inside_catch_escapes() {
        let actions = ActionRegistry::new();
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "try",
             "try": [{"type": "action", "name": "a", "path": "boom"}],
             "catch": [{"type": "action", "name": "b", "path": "boom"}]}
        ]));
        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().status, 500);
    }

    #[tokio::test]
    async fn nested_try_catches_inner_failure() {
        let actions = ActionRegistry::new();
        actions.register("boom", Arc::new(Boom));
        let def = flux(json!([
            {"type": "try",
             "try": [
                {"type": "try",
                 "try": [{"type": "action", "name": "a", "path": "boom"}],
                 "catch": [{"type": "action", "name": "b", "path": "boom"}]}
             ],
             "catch": [{"type": "return", "body": "outer caught"}],
             "errorVar": "err"}
        ]));
        let ctx = ctx(json!({}));
        executor(actions).execute_flux(&def, &ctx).await;
        assert_eq!(ctx.take_response().unwrap().body, json!("outer caught"));
        assert_eq!(ctx.lookup("err.message"), Some(json!("boom")));
    }

    // -----------------------------------------------------------------------
    // Static parallel disjointness check
    // -----------------------------------------------------------------------

    #[test]
    fn collect_action_names_recurses_all_shapes() {
        let def = flux(json!([
            {"type": "condition", "if": "${x}",
             "then": [{"type": "action", "name": "a", "path": "p"}],
             "else": [{"type": "forEach", "items": "${xs}", "as": "i",
                       "do": [{"type": "action", "name": "b", "path": "p"}]}]},
            {"type": "try",
             "try": [{"type": "action", "name": "c", "path": "p"}],
             "catch": [{"type": "action", "name": "d", "path": "p"}]}
        ]));
        let mut names = Vec::new();
        collect_action_names(&def.flow, &mut names);
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }
}

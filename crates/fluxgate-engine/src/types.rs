//! Flux schema types — the contract between flux authors and the engine.
//!
//! A *flux* binds one HTTP endpoint to a *flow*: an ordered tree of nodes
//! interpreted per request. Definitions are immutable once loaded; the
//! executor never mutates them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The HTTP methods a flux may bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Options,
        HttpMethod::Head,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete definition of one endpoint's flow.
///
/// Route identity is `(method, endpoint)`; the source filename is
/// informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluxDef {
    /// URL pattern with colon-prefixed path parameters, e.g. `/users/:id`.
    pub endpoint: String,
    pub method: HttpMethod,
    /// Human text; ignored by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub flow: Vec<FlowNode>,
}

/// One node in a flux's flow tree.
///
/// Every variant must have a handler in the executor — dispatch is an
/// exhaustive match. Unknown `type` tags are rejected at deserialisation;
/// extra keys on a recognised node are tolerated for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowNode {
    /// Invoke the action handler registered at `path`; the returned value
    /// is stored under `name` (both `results[name]` and the top-level
    /// binding `name`).
    #[serde(rename = "action")]
    Action {
        name: String,
        path: String,
        /// Argument bag; each value is interpolated against the context
        /// before the handler runs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Map<String, Value>>,
    },
    /// Branch on a boolean expression.
    #[serde(rename = "condition")]
    Condition {
        #[serde(rename = "if")]
        when: String,
        then: Vec<FlowNode>,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "else")]
        otherwise: Option<Vec<FlowNode>>,
    },
    /// Iterate a resolved array sequentially, binding each element to `as`
    /// for the duration of the body.
    #[serde(rename = "forEach")]
    ForEach {
        items: String,
        #[serde(rename = "as")]
        bind: String,
        #[serde(rename = "do")]
        body: Vec<FlowNode>,
    },
    /// Run branches concurrently over the shared request context.
    ///
    /// Branches must write disjoint result names; the engine does not
    /// serialise writes between them.
    #[serde(rename = "parallel")]
    Parallel { branches: Vec<Vec<FlowNode>> },
    /// Catch any failure raised inside `try`. The caught error is bound
    /// under `errorVar` (when given) while `catch` runs.
    #[serde(rename = "try")]
    Try {
        #[serde(rename = "try")]
        attempt: Vec<FlowNode>,
        catch: Vec<FlowNode>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            rename = "errorVar"
        )]
        error_var: Option<String>,
    },
    /// Terminate the flow and write the HTTP response.
    #[serde(rename = "return")]
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        body: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_action_node() {
        let node: FlowNode = serde_json::from_value(json!({
            "type": "action",
            "name": "user",
            "path": "users/fetch",
            "args": {"id": "${input.id}"}
        }))
        .unwrap();
        match node {
            FlowNode::Action { name, path, args } => {
                assert_eq!(name, "user");
                assert_eq!(path, "users/fetch");
                assert_eq!(args.unwrap()["id"], json!("${input.id}"));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn deserialize_for_each_keywords() {
        let node: FlowNode = serde_json::from_value(json!({
            "type": "forEach",
            "items": "${input.xs}",
            "as": "x",
            "do": [{"type": "return", "body": "${x}"}]
        }))
        .unwrap();
        match node {
            FlowNode::ForEach { items, bind, body } => {
                assert_eq!(items, "${input.xs}");
                assert_eq!(bind, "x");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected forEach, got {other:?}"),
        }
    }

    #[test]
    fn unknown_node_type_rejected() {
        let result: Result<FlowNode, _> =
            serde_json::from_value(json!({"type": "teleport", "to": "nowhere"}));
        assert!(result.is_err());
    }

    #[test]
    fn extra_keys_tolerated() {
        let node: FlowNode = serde_json::from_value(json!({
            "type": "return",
            "body": {"ok": true},
            "comment": "ignored by the engine"
        }))
        .unwrap();
        assert!(matches!(node, FlowNode::Return { status: None, .. }));
    }

    #[test]
    fn flux_def_round_trip() {
        let def: FluxDef = serde_json::from_value(json!({
            "endpoint": "/hello",
            "method": "GET",
            "flow": [
                {"type": "action", "name": "r", "path": "hello"},
                {"type": "return", "body": "${r}"}
            ]
        }))
        .unwrap();
        assert_eq!(def.endpoint, "/hello");
        assert_eq!(def.method, HttpMethod::Get);
        assert_eq!(def.flow.len(), 2);

        let back = serde_json::to_value(&def).unwrap();
        assert_eq!(back["method"], "GET");
        assert_eq!(back["flow"][0]["type"], "action");
    }

    #[test]
    fn method_display_uppercase() {
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }
}
